//! # Workflows Module
//!
//! The public entry points. Each workflow runs the complete control flow of
//! one scientific procedure: pruning shrinks the space, the conformation tree
//! enumerates candidates in non-decreasing score order, and the caller's
//! refinement service and the partition-function accumulator consume them.
//!
//! - [`gmec`] - find the optimal conformation and everything within an energy
//!   window of it
//! - [`pfunc`] - estimate the partition function to a target relative error,
//!   widening the pruning window and restarting the search when the target is
//!   unreachable

pub mod gmec;
pub mod pfunc;

pub use gmec::{GmecResult, find_gmec};
pub use pfunc::{BoundRefiner, ConfRefiner, PfuncResult, estimate};
