//! Pruning matrix: the boolean table of rotamers and rotamer pairs eliminated
//! as provably suboptimal within an energy window.

pub mod matrix;

pub use matrix::PruningMatrix;
