//! # Engine Module
//!
//! The stateful logic core: every algorithm that consumes the oracles in
//! [`crate::core`] lives here.
//!
//! - **Configuration** ([`config`]) - immutable search and estimation
//!   parameters with validating builders
//! - **Branch-and-bound search** ([`astar`]) - the conformation tree, its
//!   admissible heuristics, and branching order strategies
//! - **Dead-end elimination** ([`dee`]) - the fixed-point pruning engine
//! - **Partition function** ([`pfunc`]) - the epsilon-bounded accumulator
//! - **Task execution** ([`tasks`]) - the worker pool that parallelizes
//!   per-conformation refinement
//! - **Error Handling** ([`error`]) - engine-specific error types
//!
//! Programming-invariant violations (mismatched matrix dimensions, assigning
//! an already-defined position) abort via `assert!`; they indicate caller
//! bugs, not runtime conditions. Infinite energies are valid domain values
//! throughout.

pub mod astar;
pub mod config;
pub mod dee;
pub mod error;
pub mod pfunc;
pub mod tasks;
