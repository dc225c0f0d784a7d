//! Time-bounded, single-holder leases per job.
//!
//! A lease is the key `job:{id}:lock` holding the holder token, created with
//! the store's conditional set. At most one live lease exists per job id.
//! Release and extension are compare-and-swap operations, so a holder whose
//! lease expired and was taken over cannot disturb the new holder.

use std::sync::Arc;
use std::time::Duration;

use crate::core::types::{HolderId, JobId};
use crate::storage::{Store, StoreError, lock_key};

/// Acquires and releases execution leases.
pub struct LockManager<S> {
    store: Arc<S>,
}

impl<S> Clone for LockManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> LockManager<S> {
    /// Create a lock manager over a shared store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Take the lease for `job_id` unless someone holds a live one.
    pub async fn acquire(
        &self,
        job_id: &JobId,
        holder: &HolderId,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let acquired = self
            .store
            .set_if_absent(&lock_key(job_id), holder.as_str(), ttl)
            .await?;
        tracing::trace!(job_id = %job_id, holder = %holder, acquired, "lease acquire");
        Ok(acquired)
    }

    /// Drop the lease if `holder` still owns it.
    pub async fn release(&self, job_id: &JobId, holder: &HolderId) -> Result<bool, StoreError> {
        let released = self
            .store
            .delete_if_equals(&lock_key(job_id), holder.as_str())
            .await?;
        if !released {
            tracing::debug!(
                job_id = %job_id,
                holder = %holder,
                "lease was no longer held at release"
            );
        }
        Ok(released)
    }

    /// Refresh the lease TTL if `holder` still owns it.
    pub async fn extend(
        &self,
        job_id: &JobId,
        holder: &HolderId,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.store
            .expire_if_equals(&lock_key(job_id), holder.as_str(), ttl)
            .await
    }

    /// Current holder of a live lease.
    pub async fn holder(&self, job_id: &JobId) -> Result<Option<HolderId>, StoreError> {
        Ok(self
            .store
            .get(&lock_key(job_id))
            .await?
            .map(HolderId::new))
    }
}
