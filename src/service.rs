//! Job submission, lookup and removal for external callers.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

use crate::context::SchedulerContext;
use crate::core::job::{Job, JobError, NewJob};
use crate::core::types::JobId;
use crate::storage::{Store, StoreError};

/// Errors returned by [`JobService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The submission was rejected before anything was written.
    #[error(transparent)]
    Validation(#[from] JobError),

    /// No record exists for the id.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// Another holder has the job's lease, usually because it is executing.
    #[error("job {0} is busy; retry once its current execution has finished")]
    Busy(JobId),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Creates, reads and removes jobs.
pub struct JobService<S> {
    ctx: Arc<SchedulerContext<S>>,
}

impl<S> Clone for JobService<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
        }
    }
}

impl<S: Store> JobService<S> {
    /// Create a service over a shared context.
    pub fn new(ctx: Arc<SchedulerContext<S>>) -> Self {
        Self { ctx }
    }

    /// Validate a submission and persist it as a pending job.
    ///
    /// Nothing is written when validation fails.
    pub async fn create_job(&self, new: NewJob) -> Result<Job, ServiceError> {
        let job = Job::create(new, self.ctx.default_max_retries(), Utc::now())?;
        if !self.ctx.registry().contains(job.task_ref()) {
            return Err(JobError::UnknownTask(job.task_ref().clone()).into());
        }

        self.ctx.jobs().save(&job).await?;
        tracing::info!(
            job_id = %job.id(),
            name = %job.name(),
            schedule = %job.schedule(),
            task = %job.task_ref(),
            "job created"
        );
        Ok(job)
    }

    /// Fetch one job.
    pub async fn get_job(&self, id: &JobId) -> Result<Job, ServiceError> {
        self.ctx
            .jobs()
            .load(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(id.clone()))
    }

    /// Delete a job record and its index entries.
    ///
    /// Removal takes the job's lease like any other mutation, so an
    /// execution in progress cannot write the record back afterwards.
    pub async fn remove_job(&self, id: &JobId) -> Result<(), ServiceError> {
        let holder = self.ctx.holder();
        if !self
            .ctx
            .locks()
            .acquire(id, holder, self.ctx.lease_ttl())
            .await?
        {
            tracing::debug!(job_id = %id, "remove refused, lease held");
            return Err(ServiceError::Busy(id.clone()));
        }

        let removed = self.ctx.jobs().remove(id).await;
        if let Err(e) = self.ctx.locks().release(id, holder).await {
            tracing::warn!(job_id = %id, error = %e, "failed to release lease after remove");
        }

        if !removed? {
            return Err(ServiceError::NotFound(id.clone()));
        }
        tracing::info!(job_id = %id, "job removed");
        Ok(())
    }

    /// Jobs in the pending index, soonest first.
    ///
    /// Ids whose record is missing or undecodable are logged and skipped.
    pub async fn pending_jobs(&self) -> Result<Vec<Job>, ServiceError> {
        let mut jobs = Vec::new();
        for id in self.ctx.jobs().pending_ids().await? {
            match self.ctx.jobs().load(&id).await {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => tracing::warn!(job_id = %id, "pending index entry without record"),
                Err(StoreError::Serialization(e)) => {
                    tracing::warn!(job_id = %id, error = %e, "skipping undecodable job record")
                }
                Err(e) => return Err(e.into()),
            }
        }
        jobs.sort_by(|a, b| {
            a.next_run_at()
                .cmp(&b.next_run_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(jobs)
    }
}
