//! keel - a distributed job scheduler.
//!
//! Jobs are stored in a shared key-value store. Every process runs its own
//! [`Dispatcher`]; a per-job lease taken through the [`LockManager`] makes
//! sure only one process executes a given job at a time. Failed attempts are
//! retried with backoff up to each job's `maxRetries`.

pub mod api;
pub mod config;
pub mod context;
pub mod core;
pub mod dispatcher;
pub mod execution;
pub mod lock;
pub mod service;
pub mod storage;
pub mod testing;

pub use config::{ConfigError, KeelConfig, StoreConfig};
pub use context::SchedulerContext;
pub use core::job::{Completion, FailureOutcome, Job, JobError, JobStatus, NewJob};
pub use core::retry::{Backoff, BackoffPolicy};
pub use core::schedule::{Schedule, ScheduleError, ScheduleKind};
pub use core::task::{TaskContext, TaskError, TaskHandler, TaskRegistry};
pub use core::types::{HolderId, JobId, TaskRef};
pub use dispatcher::{Dispatcher, DispatcherError, DispatcherHandle, DispatcherState, TickReport};
pub use execution::{ExecutionEngine, ExecutionError, ExecutionOutcome, SkipReason};
pub use lock::LockManager;
pub use service::{JobService, ServiceError};
pub use storage::{InMemoryStore, JobStore, Store, StoreError};

#[cfg(feature = "redis")]
pub use storage::RedisStore;
#[cfg(feature = "sqlite")]
pub use storage::SqliteStore;
