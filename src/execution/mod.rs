//! Job execution under a lease.
//!
//! The engine is the only component that mutates a persisted job, and it
//! only does so while holding that job's lease.

mod engine;

pub use engine::{ExecutionEngine, ExecutionError, ExecutionOutcome, SkipReason};
