//! # Conforma Core Library
//!
//! A library for discrete conformational optimization: provably-ordered
//! branch-and-bound enumeration of rotamer assignments scored by a precomputed
//! pairwise energy model, dead-end elimination pruning, and statistically
//! bounded partition function estimation.
//!
//! ## Architectural Philosophy
//!
//! The library is designed with a strict three-layer architecture to ensure a
//! clear separation of concerns, making it modular, testable, and extensible.
//!
//! - **[`core`]: The Foundation.** Contains stateless data structures: the
//!   energy matrix oracle (with snapshot persistence), the pruning matrix,
//!   the partial-assignment index, and log-domain numeric utilities.
//!
//! - **[`engine`]: The Logic Core.** This stateful layer implements the
//!   algorithms: the A*-style conformation tree with pluggable admissible
//!   heuristics, the dead-end elimination fixed point, the partition function
//!   accumulator, and the concurrent task executor.
//!
//! - **[`workflows`]: The Public API.** This is the highest-level, user-facing
//!   layer. It ties the `engine` and `core` together to execute complete
//!   procedures: GMEC search with window enumeration, and partition function
//!   estimation with automatic pruning-window restart.

pub mod core;
pub mod engine;
pub mod workflows;
