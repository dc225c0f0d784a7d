//! Dispatcher for ready jobs.
//!
//! This module provides the polling loop that hands ready jobs to the
//! execution engine and recovers jobs abandoned by crashed holders.

mod engine;
mod handle;
mod types;

pub use engine::{
    DEFAULT_MAX_CONCURRENT_JOBS, DEFAULT_POLL_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT, Dispatcher,
};
pub use handle::DispatcherHandle;
pub use types::{DispatcherError, DispatcherState, TickReport};
