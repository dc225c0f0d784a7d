//! Task handlers and the registry that resolves them.
//!
//! A job never carries executable code. Its `taskRef` names a handler that
//! every replica registers at startup, and the execution engine resolves the
//! reference through a [`TaskRegistry`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::types::{HolderId, JobId, TaskRef};

/// Errors that can occur during task execution.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task execution failed with a message.
    #[error("execution failed: {0}")]
    Failed(String),

    /// No handler is registered under the job's task reference.
    #[error("no handler registered for task '{0}'")]
    UnknownTask(TaskRef),

    /// The handler panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Information passed to a handler for one invocation.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Job being executed.
    pub job_id: JobId,
    /// Human-readable job name.
    pub job_name: String,
    /// 1-based attempt number (`retryCount + 1`).
    pub attempt: u32,
    /// Lease holder running this invocation.
    pub holder: HolderId,
    /// When the invocation started.
    pub started_at: DateTime<Utc>,
}

/// A unit of work that jobs can reference by name.
///
/// # Example
///
/// ```ignore
/// use keel::{TaskContext, TaskError, TaskHandler};
/// use async_trait::async_trait;
///
/// struct SendDigest;
///
/// #[async_trait]
/// impl TaskHandler for SendDigest {
///     async fn run(&self, ctx: &TaskContext) -> Result<(), TaskError> {
///         tracing::info!(job_id = %ctx.job_id, "sending digest");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run the task once.
    async fn run(&self, ctx: &TaskContext) -> Result<(), TaskError>;

    /// Optional description for display/logging purposes.
    fn description(&self) -> Option<&str> {
        None
    }
}

/// Maps task references to handlers.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<TaskRef, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in `noop` and `log` handlers.
    pub fn with_builtins() -> Self {
        Self::new()
            .with_handler("noop", NoopTask)
            .with_handler("log", LogTask)
    }

    /// Register a handler, replacing any previous one under the same name.
    pub fn register(&mut self, name: impl Into<TaskRef>, handler: impl TaskHandler + 'static) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    /// Builder: register a handler.
    pub fn with_handler(
        mut self,
        name: impl Into<TaskRef>,
        handler: impl TaskHandler + 'static,
    ) -> Self {
        self.register(name, handler);
        self
    }

    /// Resolve a task reference.
    pub fn get(&self, task_ref: &TaskRef) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_ref).cloned()
    }

    /// Whether a handler is registered under `task_ref`.
    pub fn contains(&self, task_ref: &TaskRef) -> bool {
        self.handlers.contains_key(task_ref)
    }

    /// Registered task names, sorted.
    pub fn names(&self) -> Vec<TaskRef> {
        let mut names: Vec<TaskRef> = self.handlers.keys().cloned().collect();
        names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        names
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

/// Does nothing.
pub struct NoopTask;

#[async_trait]
impl TaskHandler for NoopTask {
    async fn run(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
        Ok(())
    }

    fn description(&self) -> Option<&str> {
        Some("does nothing")
    }
}

/// Logs each firing at info level.
pub struct LogTask;

#[async_trait]
impl TaskHandler for LogTask {
    async fn run(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        tracing::info!(
            job_id = %ctx.job_id,
            job_name = %ctx.job_name,
            attempt = ctx.attempt,
            holder = %ctx.holder,
            "job fired"
        );
        Ok(())
    }

    fn description(&self) -> Option<&str> {
        Some("logs the firing")
    }
}
