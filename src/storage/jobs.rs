//! Job records and index sets on top of a [`Store`].
//!
//! Layout:
//! - `job:{id}`: the job as one JSON string
//! - `job:{id}:lock`: the execution lease
//! - `pending_jobs`: ids of jobs in `pending`
//! - `running_jobs`: ids of jobs in `running`

use std::sync::Arc;

use super::{Store, StoreError, WriteOp};
use crate::core::job::{Job, JobStatus};
use crate::core::types::JobId;

/// Set of ids whose job is waiting to run.
pub const PENDING_INDEX: &str = "pending_jobs";

/// Set of ids whose job is currently running somewhere.
pub const RUNNING_INDEX: &str = "running_jobs";

/// Key holding the job record.
pub fn job_key(id: &JobId) -> String {
    format!("job:{}", id)
}

/// Key holding the job's execution lease.
pub fn lock_key(id: &JobId) -> String {
    format!("job:{}:lock", id)
}

/// Reads and writes job records, keeping the index sets in line with each
/// job's status.
pub struct JobStore<S> {
    store: Arc<S>,
}

impl<S> Clone for JobStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> JobStore<S> {
    /// Wrap a shared store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Load a job record.
    pub async fn load(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        match self.store.get(&job_key(id)).await? {
            Some(raw) => Job::from_json(&raw)
                .map(Some)
                .map_err(|e| StoreError::Serialization(format!("job {}: {}", id, e))),
            None => Ok(None),
        }
    }

    /// Persist a job record and its index membership in one batch.
    pub async fn save(&self, job: &Job) -> Result<(), StoreError> {
        let raw = job
            .to_json()
            .map_err(|e| StoreError::Serialization(format!("job {}: {}", job.id(), e)))?;
        let id = job.id().as_str();

        let mut ops = vec![WriteOp::set(job_key(job.id()), raw)];
        match job.status() {
            JobStatus::Pending => {
                ops.push(WriteOp::set_add(PENDING_INDEX, id));
                ops.push(WriteOp::set_remove(RUNNING_INDEX, id));
            }
            JobStatus::Running => {
                ops.push(WriteOp::set_remove(PENDING_INDEX, id));
                ops.push(WriteOp::set_add(RUNNING_INDEX, id));
            }
            JobStatus::Completed | JobStatus::Failed => {
                ops.push(WriteOp::set_remove(PENDING_INDEX, id));
                ops.push(WriteOp::set_remove(RUNNING_INDEX, id));
            }
        }

        self.store.write_batch(ops).await
    }

    /// Delete a job record and both index entries.
    ///
    /// Returns whether a record existed.
    pub async fn remove(&self, id: &JobId) -> Result<bool, StoreError> {
        let existed = self.store.get(&job_key(id)).await?.is_some();
        self.store
            .write_batch(vec![
                WriteOp::delete(job_key(id)),
                WriteOp::set_remove(PENDING_INDEX, id.as_str()),
                WriteOp::set_remove(RUNNING_INDEX, id.as_str()),
            ])
            .await?;
        Ok(existed)
    }

    /// Ids in the pending index.
    pub async fn pending_ids(&self) -> Result<Vec<JobId>, StoreError> {
        self.index(PENDING_INDEX).await
    }

    /// Ids in the running index.
    pub async fn running_ids(&self) -> Result<Vec<JobId>, StoreError> {
        self.index(RUNNING_INDEX).await
    }

    async fn index(&self, set: &str) -> Result<Vec<JobId>, StoreError> {
        Ok(self
            .store
            .set_members(set)
            .await?
            .into_iter()
            .map(JobId::from)
            .collect())
    }
}
