//! Storage abstraction over a shared key-value and set store.
//!
//! Every replica talks to the same backing store. The [`Store`] trait exposes
//! the small set of primitives the scheduler coordinates through, and
//! [`JobStore`] layers the job record and index layout on top.

mod jobs;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use jobs::{JobStore, PENDING_INDEX, RUNNING_INDEX, job_key, lock_key};
pub use memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backing store reported an error.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// One write inside an atomic [`Store::write_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Set a key without expiry.
    Set { key: String, value: String },
    /// Delete a key.
    Delete { key: String },
    /// Add a member to a set.
    SetAdd { set: String, member: String },
    /// Remove a member from a set.
    SetRemove { set: String, member: String },
}

impl WriteOp {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    pub fn set_add(set: impl Into<String>, member: impl Into<String>) -> Self {
        Self::SetAdd {
            set: set.into(),
            member: member.into(),
        }
    }

    pub fn set_remove(set: impl Into<String>, member: impl Into<String>) -> Self {
        Self::SetRemove {
            set: set.into(),
            member: member.into(),
        }
    }
}

/// Primitives of the shared coordination store.
///
/// Keys written with a TTL disappear once it elapses; every read treats an
/// expired key as absent.
#[async_trait]
pub trait Store: Send + Sync {
    // Key operations

    /// Read a live key.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a key, clearing any expiry.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete a key. Returns whether a live key was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    // Set operations

    /// Add a member to a set.
    async fn set_add(&self, set: &str, member: &str) -> Result<(), StoreError>;

    /// Remove a member from a set.
    async fn set_remove(&self, set: &str, member: &str) -> Result<(), StoreError>;

    /// List the members of a set.
    async fn set_members(&self, set: &str) -> Result<Vec<String>, StoreError>;

    // Conditional operations

    /// Create `key` with `value` and expiry `ttl` unless a live key exists.
    ///
    /// Returns true when the key was created.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, StoreError>;

    /// Delete `key` only when its live value equals `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Reset the expiry of `key` to `ttl` only when its live value equals
    /// `expected`.
    async fn expire_if_equals(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    // Batches

    /// Apply all writes atomically.
    async fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;
}
