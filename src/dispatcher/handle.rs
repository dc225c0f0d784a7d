//! Dispatcher handle for controlling the dispatcher.
//!
//! This module provides the `DispatcherHandle` type that allows external
//! control of the dispatcher through commands like trigger, pause, resume,
//! and shutdown.

use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};

use crate::core::types::JobId;
use crate::execution::ExecutionOutcome;

use super::types::{DispatcherCommand, DispatcherError, DispatcherState};

/// Buffer size for the command channel between DispatcherHandle and Dispatcher.
pub(crate) const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Handle for controlling the dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    pub(crate) command_tx: mpsc::Sender<DispatcherCommand>,
    pub(crate) state: Arc<RwLock<DispatcherState>>,
}

impl DispatcherHandle {
    /// Helper to send a command that returns a result and wait for response.
    async fn send_result_command<T>(
        &self,
        build_command: impl FnOnce(oneshot::Sender<Result<T, DispatcherError>>) -> DispatcherCommand,
        operation: &str,
    ) -> Result<T, DispatcherError>
    where
        T: Send + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build_command(response_tx))
            .await
            .map_err(|_| {
                DispatcherError::ChannelError(format!("failed to send {} command", operation))
            })?;

        response_rx.await.map_err(|_| {
            DispatcherError::ChannelError(format!("failed to receive {} response", operation))
        })?
    }

    /// Helper to send a command that returns unit and wait for response.
    async fn send_unit_command(
        &self,
        build_command: impl FnOnce(oneshot::Sender<()>) -> DispatcherCommand,
        operation: &str,
    ) -> Result<(), DispatcherError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build_command(response_tx))
            .await
            .map_err(|_| {
                DispatcherError::ChannelError(format!("failed to send {} command", operation))
            })?;

        response_rx.await.map_err(|_| {
            DispatcherError::ChannelError(format!("failed to receive {} response", operation))
        })?;

        Ok(())
    }

    /// Execute a job now, ignoring its `nextRunAt`.
    ///
    /// Resolves once the attempt has finished.
    pub async fn trigger(
        &self,
        job_id: impl Into<JobId>,
    ) -> Result<ExecutionOutcome, DispatcherError> {
        let job_id = job_id.into();
        self.send_result_command(
            |response| DispatcherCommand::Trigger { job_id, response },
            "trigger",
        )
        .await
    }

    /// Pause the dispatcher.
    ///
    /// While paused, ready jobs are not dispatched, but manual triggers still work.
    pub async fn pause(&self) -> Result<(), DispatcherError> {
        self.send_unit_command(|response| DispatcherCommand::Pause { response }, "pause")
            .await
    }

    /// Resume the dispatcher after being paused.
    pub async fn resume(&self) -> Result<(), DispatcherError> {
        self.send_unit_command(|response| DispatcherCommand::Resume { response }, "resume")
            .await
    }

    /// Shutdown the dispatcher, waiting for in-flight executions.
    pub async fn shutdown(&self) -> Result<(), DispatcherError> {
        self.send_unit_command(
            |response| DispatcherCommand::Shutdown { response },
            "shutdown",
        )
        .await
    }

    /// Get the current dispatcher state.
    pub async fn state(&self) -> DispatcherState {
        *self.state.read().await
    }

    /// Check if the dispatcher is running.
    pub async fn is_running(&self) -> bool {
        *self.state.read().await == DispatcherState::Running
    }

    /// Check if the dispatcher is paused.
    pub async fn is_paused(&self) -> bool {
        *self.state.read().await == DispatcherState::Paused
    }
}
