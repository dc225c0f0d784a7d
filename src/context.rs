//! Shared scheduler context.
//!
//! Built once per process and handed to the execution engine, the dispatcher
//! and the job service behind an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use crate::core::job::DEFAULT_MAX_RETRIES;
use crate::core::retry::{Backoff, BackoffPolicy};
use crate::core::task::TaskRegistry;
use crate::core::types::HolderId;
use crate::lock::LockManager;
use crate::storage::{JobStore, Store};

/// Default lease time-to-live.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(300);

/// Store client, task registry, holder identity and execution settings.
pub struct SchedulerContext<S> {
    store: Arc<S>,
    jobs: JobStore<S>,
    locks: LockManager<S>,
    registry: TaskRegistry,
    holder: HolderId,
    lease_ttl: Duration,
    heartbeat_interval: Option<Duration>,
    backoff: Arc<dyn Backoff>,
    default_max_retries: u32,
}

impl<S: Store> SchedulerContext<S> {
    /// Create a context with a fresh holder id and default settings.
    pub fn new(store: Arc<S>, registry: TaskRegistry) -> Self {
        Self {
            jobs: JobStore::new(Arc::clone(&store)),
            locks: LockManager::new(Arc::clone(&store)),
            store,
            registry,
            holder: HolderId::generate(),
            lease_ttl: DEFAULT_LEASE_TTL,
            heartbeat_interval: None,
            backoff: Arc::new(BackoffPolicy::default()),
            default_max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Builder: set the holder identity.
    pub fn with_holder(mut self, holder: HolderId) -> Self {
        self.holder = holder;
        self
    }

    /// Builder: set the lease TTL.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Builder: extend the lease on this interval while a task runs.
    ///
    /// A zero interval disables the heartbeat.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Builder: set the backoff applied after a failed attempt.
    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Builder: set the retry bound for jobs submitted without one.
    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn jobs(&self) -> &JobStore<S> {
        &self.jobs
    }

    pub fn locks(&self) -> &LockManager<S> {
        &self.locks
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// This process's lease token.
    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    pub fn backoff(&self) -> &dyn Backoff {
        self.backoff.as_ref()
    }

    pub fn default_max_retries(&self) -> u32 {
        self.default_max_retries
    }
}

impl<S> std::fmt::Debug for SchedulerContext<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerContext")
            .field("holder", &self.holder)
            .field("registry", &self.registry)
            .field("lease_ttl", &self.lease_ttl)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("default_max_retries", &self.default_max_retries)
            .finish()
    }
}
