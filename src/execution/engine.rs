//! Execution engine.
//!
//! `ExecutionEngine` runs one job attempt:
//! - takes the job's lease, or reports `NotAcquired`
//! - reloads the record under the lease and moves it to `running`
//! - invokes the registered handler on its own tokio task, extending the
//!   lease on the heartbeat interval
//! - applies `complete` or `fail`, persists, and releases the lease

use chrono::{DateTime, Utc};
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

use crate::context::SchedulerContext;
use crate::core::job::{Completion, FailureOutcome, Job, JobError, JobStatus};
use crate::core::task::{TaskContext, TaskError};
use crate::core::types::{HolderId, JobId};
use crate::storage::{Store, StoreError};

/// Errors that can occur while executing a job.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The store failed; the outcome of the attempt is unknown.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The stored job rejected a transition.
    #[error(transparent)]
    Transition(#[from] JobError),

    /// The task failed. The failure has been persisted and the lease
    /// released.
    #[error("job {} failed: {source}", .job.id())]
    Task { job: Box<Job>, source: TaskError },
}

/// Why an acquired job was not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The record no longer exists.
    Missing,
    /// The record is not `pending` (another replica finished it).
    NotPending(JobStatus),
    /// The record is not `running`, so there is nothing to recover.
    NotRunning(JobStatus),
    /// The job is pending but not ready yet.
    NotDue,
}

/// Normal results of an execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The task ran and succeeded.
    Completed { job: Job, completion: Completion },
    /// A job abandoned by a crashed holder was moved back through `fail`.
    Recovered { job: Job, failure: FailureOutcome },
    /// Another holder has the lease.
    NotAcquired,
    /// The lease was taken but the job was left untouched.
    Skipped(SkipReason),
}

/// Runs jobs under their lease.
pub struct ExecutionEngine<S> {
    ctx: Arc<SchedulerContext<S>>,
}

impl<S> Clone for ExecutionEngine<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
        }
    }
}

impl<S: Store + 'static> ExecutionEngine<S> {
    /// Create an engine over a shared context.
    pub fn new(ctx: Arc<SchedulerContext<S>>) -> Self {
        Self { ctx }
    }

    /// The shared context.
    pub fn context(&self) -> &Arc<SchedulerContext<S>> {
        &self.ctx
    }

    /// Run `job` now, regardless of its `nextRunAt`.
    pub async fn execute(
        &self,
        job: &Job,
        holder: &HolderId,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        self.run_leased(job.id(), holder, None).await
    }

    /// Run `job` only if it is still ready at `now` once the lease is held.
    pub async fn execute_due(
        &self,
        job: &Job,
        holder: &HolderId,
        now: DateTime<Utc>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        self.run_leased(job.id(), holder, Some(now)).await
    }

    /// Fail a `running` job whose holder is gone.
    ///
    /// Acquiring the lease proves that no live holder exists. The abandoned
    /// attempt counts as a failure, so retries stay bounded.
    pub async fn recover(
        &self,
        job_id: &JobId,
        holder: &HolderId,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        if !self
            .ctx
            .locks()
            .acquire(job_id, holder, self.ctx.lease_ttl())
            .await?
        {
            return Ok(ExecutionOutcome::NotAcquired);
        }

        let result = self.recover_under_lease(job_id).await;
        self.release(job_id, holder, result).await
    }

    async fn run_leased(
        &self,
        job_id: &JobId,
        holder: &HolderId,
        due: Option<DateTime<Utc>>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        if !self
            .ctx
            .locks()
            .acquire(job_id, holder, self.ctx.lease_ttl())
            .await?
        {
            tracing::debug!(job_id = %job_id, "lease held elsewhere");
            return Ok(ExecutionOutcome::NotAcquired);
        }

        let result = self.run_under_lease(job_id, holder, due).await;
        self.release(job_id, holder, result).await
    }

    async fn run_under_lease(
        &self,
        job_id: &JobId,
        holder: &HolderId,
        due: Option<DateTime<Utc>>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let Some(mut job) = self.ctx.jobs().load(job_id).await? else {
            return Ok(ExecutionOutcome::Skipped(SkipReason::Missing));
        };
        if job.status() != JobStatus::Pending {
            return Ok(ExecutionOutcome::Skipped(SkipReason::NotPending(job.status())));
        }
        if let Some(now) = due {
            if !job.is_ready(now) {
                return Ok(ExecutionOutcome::Skipped(SkipReason::NotDue));
            }
        }

        let started_at = Utc::now();
        job.start(holder, started_at)?;
        self.ctx.jobs().save(&job).await?;
        tracing::info!(
            job_id = %job.id(),
            task = %job.task_ref(),
            attempt = job.retry_count() + 1,
            "job started"
        );

        let result = self.invoke(&job, holder, started_at).await;
        let finished_at = Utc::now();

        match result {
            Ok(()) => {
                let completion = job.complete(finished_at)?;
                self.ctx.jobs().save(&job).await?;
                match completion {
                    Completion::Rescheduled(at) => {
                        tracing::info!(job_id = %job.id(), next_run_at = %at, "job completed")
                    }
                    Completion::Finished => {
                        tracing::info!(job_id = %job.id(), "job completed, no further runs")
                    }
                }
                Ok(ExecutionOutcome::Completed { job, completion })
            }
            Err(source) => {
                let failure = job.fail(finished_at, self.ctx.backoff())?;
                self.ctx.jobs().save(&job).await?;
                log_failure(&job, &failure, &source);
                Err(ExecutionError::Task {
                    job: Box::new(job),
                    source,
                })
            }
        }
    }

    async fn recover_under_lease(
        &self,
        job_id: &JobId,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let Some(mut job) = self.ctx.jobs().load(job_id).await? else {
            return Ok(ExecutionOutcome::Skipped(SkipReason::Missing));
        };
        if job.status() != JobStatus::Running {
            return Ok(ExecutionOutcome::Skipped(SkipReason::NotRunning(job.status())));
        }

        let previous_owner = job.owner_id().map(|h| h.to_string()).unwrap_or_default();
        let failure = job.fail(Utc::now(), self.ctx.backoff())?;
        self.ctx.jobs().save(&job).await?;
        tracing::warn!(
            job_id = %job.id(),
            previous_owner = %previous_owner,
            retry_count = job.retry_count(),
            status = %job.status(),
            "recovered job abandoned by its holder"
        );

        Ok(ExecutionOutcome::Recovered { job, failure })
    }

    /// Release the lease whatever `result` is.
    async fn release(
        &self,
        job_id: &JobId,
        holder: &HolderId,
        result: Result<ExecutionOutcome, ExecutionError>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        match self.ctx.locks().release(job_id, holder).await {
            Ok(_) => result,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "failed to release lease");
                // The attempt's own error wins over the release error.
                match result {
                    Ok(_) => Err(e.into()),
                    Err(original) => Err(original),
                }
            }
        }
    }

    /// Resolve and run the handler, heartbeating the lease meanwhile.
    async fn invoke(
        &self,
        job: &Job,
        holder: &HolderId,
        started_at: DateTime<Utc>,
    ) -> Result<(), TaskError> {
        let Some(handler) = self.ctx.registry().get(job.task_ref()) else {
            return Err(TaskError::UnknownTask(job.task_ref().clone()));
        };

        let task_ctx = TaskContext {
            job_id: job.id().clone(),
            job_name: job.name().to_string(),
            attempt: job.retry_count() + 1,
            holder: holder.clone(),
            started_at,
        };
        let mut task = tokio::spawn(async move { handler.run(&task_ctx).await });

        let joined = match self.ctx.heartbeat_interval() {
            None => task.await,
            Some(every) => {
                let mut heartbeat = tokio::time::interval(every);
                // The first tick completes immediately
                heartbeat.tick().await;
                loop {
                    tokio::select! {
                        joined = &mut task => break joined,
                        _ = heartbeat.tick() => self.heartbeat(job.id(), holder).await,
                    }
                }
            }
        };

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(TaskError::Panicked(panic_message(e.into_panic()))),
            Err(e) => Err(TaskError::Failed(format!("task did not finish: {}", e))),
        }
    }

    async fn heartbeat(&self, job_id: &JobId, holder: &HolderId) {
        match self
            .ctx
            .locks()
            .extend(job_id, holder, self.ctx.lease_ttl())
            .await
        {
            Ok(true) => tracing::trace!(job_id = %job_id, "lease extended"),
            Ok(false) => tracing::warn!(job_id = %job_id, "lease lost while task is running"),
            Err(e) => tracing::warn!(job_id = %job_id, error = %e, "failed to extend lease"),
        }
    }
}

fn log_failure(job: &Job, failure: &FailureOutcome, error: &TaskError) {
    match failure {
        FailureOutcome::Retrying {
            retry_count,
            next_run_at,
        } => tracing::warn!(
            job_id = %job.id(),
            error = %error,
            retry_count,
            next_run_at = %next_run_at,
            "job failed, will retry"
        ),
        FailureOutcome::Exhausted { retry_count } => tracing::error!(
            job_id = %job.id(),
            error = %error,
            retry_count,
            "job failed permanently"
        ),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
