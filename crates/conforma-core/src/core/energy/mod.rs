//! # Energy Matrix
//!
//! The precomputed energy model consumed by every scoring and pruning
//! decision: a constant offset, one-body energies per (position, rotamer),
//! pairwise lower-bound energies per rotamer pair, and optional higher-order
//! triple corrections. The matrix carries the pruning interval it was computed
//! under; a matrix tagged with an infinite interval is valid for any pruning
//! state. Matrices are immutable during an active search pass and are safely
//! shared across threads.
//!
//! [`io`] persists a matrix as a snapshot file tagged with its pruning
//! interval and re-validates the tag on load.

pub mod io;
pub mod matrix;

pub use matrix::{EnergyMatrix, TripleTerm};
