//! # Branch-and-Bound Conformation Tree
//!
//! An A*-style best-first search over partial rotamer assignments. Frontier
//! nodes carry an exact score for their assigned positions (g) plus an
//! admissible estimate of the best possible completion (h); because h never
//! overestimates, terminal nodes are emitted in non-decreasing true-score
//! order and the first one is the optimum over the unpruned space. That
//! strictly ordered enumeration is the contract the partition-function
//! accumulator depends on.

pub(crate) mod node;
pub(crate) mod order;
pub mod scoring;
pub mod tree;

pub use tree::ConfTree;
