//! # Task Execution
//!
//! The concurrency layer for expensive per-conformation refinement: a fixed
//! worker pool over bounded queues ([`executor`]) and a checkout/release pool
//! for per-task mutable scratch ([`pool`]). The search tree itself stays
//! single-threaded; only independent refinements run in parallel.

pub mod executor;
pub mod pool;

pub use executor::TaskExecutor;
pub use pool::ObjectPool;
