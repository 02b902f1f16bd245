//! # Partition Function
//!
//! The epsilon-bounded accumulator over the tree's ordered enumeration. The
//! estimate splits the total Boltzmann mass three ways: `qstar`, the mass of
//! conformations already enumerated and refined (a certified lower bound);
//! `qprime`, an upper bound on the mass still waiting in the unpruned space;
//! and `pstar`, an upper bound on the mass removed by pruning. The effective
//! relative error is `1 - qstar / (qstar + qprime + pstar)`, evaluated in the
//! log domain so it stays finite and stable from the first conformation to
//! convergence.

pub mod accumulator;

pub use accumulator::{Accumulator, PfuncValues, Status};
