//! Testing utilities for users of the keel library.
//!
//! This module provides task handlers with observable behavior and a harness
//! that wires them to an in-memory store:
//!
//! - [`CountingTask`]: succeeds and counts its runs
//! - [`FailingTask`]: always fails
//! - [`FlakyTask`]: fails N times then succeeds
//! - [`PanickingTask`]: panics
//! - [`SlowTask`]: sleeps and records peak concurrency
//! - [`TestHarness`]: context, engine and service over an [`InMemoryStore`]
//!
//! Handlers are `Clone` and share their counters, so a test can register a
//! clone and keep the original to inspect.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::context::SchedulerContext;
use crate::core::job::{Job, NewJob};
use crate::core::retry::BackoffPolicy;
use crate::core::task::{TaskContext, TaskError, TaskHandler, TaskRegistry};
use crate::core::types::HolderId;
use crate::execution::ExecutionEngine;
use crate::service::{JobService, ServiceError};
use crate::storage::InMemoryStore;

/// A handler that succeeds and counts its runs.
#[derive(Clone, Default)]
pub struct CountingTask {
    runs: Arc<AtomicUsize>,
}

impl CountingTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed runs.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for CountingTask {
    async fn run(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A handler that always fails.
#[derive(Clone)]
pub struct FailingTask {
    message: String,
    runs: Arc<AtomicUsize>,
}

impl FailingTask {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of attempts made.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for FailingTask {
    async fn run(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Err(TaskError::Failed(self.message.clone()))
    }
}

/// A handler that fails a fixed number of times, then succeeds.
#[derive(Clone)]
pub struct FlakyTask {
    failures: usize,
    runs: Arc<AtomicUsize>,
}

impl FlakyTask {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of attempts made.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for FlakyTask {
    async fn run(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        let attempt = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            Err(TaskError::Failed(format!(
                "{} failed on attempt {}",
                ctx.job_id, attempt
            )))
        } else {
            Ok(())
        }
    }
}

/// A handler that panics.
#[derive(Clone)]
pub struct PanickingTask {
    message: String,
}

impl PanickingTask {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl TaskHandler for PanickingTask {
    async fn run(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
        panic!("{}", self.message);
    }
}

/// A handler that sleeps, tracking how many invocations overlap.
#[derive(Clone)]
pub struct SlowTask {
    duration: Duration,
    runs: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl SlowTask {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            runs: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of finished runs.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous invocations seen.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for SlowTask {
    async fn run(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);

        tokio::time::sleep(self.duration).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Builds a context, engine and service over a fresh in-memory store.
///
/// # Example
///
/// ```ignore
/// use keel::testing::{CountingTask, TestHarness};
///
/// let task = CountingTask::new();
/// let harness = TestHarness::new().with_handler("count", task.clone()).build();
/// let job = harness.submit("once", "2020-01-01", "count").await?;
/// harness.engine.execute(&job, harness.holder()).await?;
/// assert_eq!(task.runs(), 1);
/// ```
pub struct TestHarness {
    registry: TaskRegistry,
    holder: Option<HolderId>,
    lease_ttl: Option<Duration>,
    heartbeat: Option<Duration>,
    backoff: Option<BackoffPolicy>,
}

impl TestHarness {
    /// Start from the built-in handlers.
    pub fn new() -> Self {
        Self {
            registry: TaskRegistry::with_builtins(),
            holder: None,
            lease_ttl: None,
            heartbeat: None,
            backoff: None,
        }
    }

    /// Register an extra handler.
    pub fn with_handler(mut self, name: &str, handler: impl TaskHandler + 'static) -> Self {
        self.registry.register(name, handler);
        self
    }

    /// Use a fixed holder id.
    pub fn with_holder(mut self, holder: impl Into<HolderId>) -> Self {
        self.holder = Some(holder.into());
        self
    }

    /// Set the lease TTL.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = Some(ttl);
        self
    }

    /// Enable lease heartbeats.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }

    /// Set the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Build over a new store.
    pub fn build(self) -> Harness {
        self.build_with_store(Arc::new(InMemoryStore::new()))
    }

    /// Build over an existing store, simulating another replica.
    pub fn build_with_store(self, store: Arc<InMemoryStore>) -> Harness {
        let mut ctx = SchedulerContext::new(store, self.registry);
        if let Some(holder) = self.holder {
            ctx = ctx.with_holder(holder);
        }
        if let Some(ttl) = self.lease_ttl {
            ctx = ctx.with_lease_ttl(ttl);
        }
        if let Some(interval) = self.heartbeat {
            ctx = ctx.with_heartbeat_interval(interval);
        }
        if let Some(backoff) = self.backoff {
            ctx = ctx.with_backoff(backoff);
        }

        let ctx = Arc::new(ctx);
        Harness {
            engine: ExecutionEngine::new(Arc::clone(&ctx)),
            service: JobService::new(Arc::clone(&ctx)),
            ctx,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A wired context, engine and service.
pub struct Harness {
    pub ctx: Arc<SchedulerContext<InMemoryStore>>,
    pub engine: ExecutionEngine<InMemoryStore>,
    pub service: JobService<InMemoryStore>,
}

impl Harness {
    /// Submit a job through the service.
    pub async fn submit(
        &self,
        name: &str,
        schedule: &str,
        task: &str,
    ) -> Result<Job, ServiceError> {
        self.service.create_job(NewJob::new(name, schedule, task)).await
    }

    /// The shared store.
    pub fn store(&self) -> Arc<InMemoryStore> {
        Arc::clone(self.ctx.store())
    }

    /// This harness's holder id.
    pub fn holder(&self) -> &HolderId {
        self.ctx.holder()
    }
}
