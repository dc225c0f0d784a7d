//! Dispatcher type definitions.
//!
//! This module contains error types, state enums, and command types for the
//! dispatcher.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::core::types::JobId;
use crate::execution::{ExecutionError, ExecutionOutcome};
use crate::storage::StoreError;

/// Errors that can occur in the dispatcher.
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// Executing the job failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

/// State of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatcherState {
    /// Dispatcher is stopped.
    Stopped,
    /// Dispatcher is scanning on every tick.
    Running,
    /// Scans are suspended; manual triggers still work.
    Paused,
}

/// What one scan of the pending index did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Jobs found ready.
    pub ready: usize,
    /// Jobs submitted to the execution engine.
    pub dispatched: usize,
    /// Ready jobs already executing locally.
    pub in_flight: usize,
    /// Ready jobs left for a later tick by the concurrency limit.
    pub deferred: usize,
    /// Abandoned running jobs moved back through the failure path.
    pub recovered: usize,
}

/// Commands that can be sent to the dispatcher.
pub(crate) enum DispatcherCommand {
    /// Execute a job now.
    Trigger {
        job_id: JobId,
        response: oneshot::Sender<Result<ExecutionOutcome, DispatcherError>>,
    },
    /// Pause the dispatcher.
    Pause { response: oneshot::Sender<()> },
    /// Resume the dispatcher.
    Resume { response: oneshot::Sender<()> },
    /// Shutdown the dispatcher.
    Shutdown { response: oneshot::Sender<()> },
}
