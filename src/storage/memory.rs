//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and single-process
//! deployments. Expiry uses `tokio::time::Instant`, so paused test time
//! drives lease expiry.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use super::{Store, StoreError, WriteOp};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
struct Inner {
    keys: HashMap<String, Entry>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl Inner {
    /// Live entry for `key`, dropping it if it has expired.
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self.keys.get(key).is_some_and(|entry| !entry.is_live(now)) {
            self.keys.remove(key);
        }
        self.keys.get_mut(key)
    }

    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::Set { key, value } => {
                self.keys.insert(
                    key,
                    Entry {
                        value,
                        expires_at: None,
                    },
                );
            }
            WriteOp::Delete { key } => {
                self.keys.remove(&key);
            }
            WriteOp::SetAdd { set, member } => {
                self.sets.entry(set).or_default().insert(member);
            }
            WriteOp::SetRemove { set, member } => {
                if let Some(members) = self.sets.get_mut(&set) {
                    members.remove(&member);
                    if members.is_empty() {
                        self.sets.remove(&set);
                    }
                }
            }
        }
    }
}

/// In-memory storage backend.
///
/// A single mutex guards all keys and sets, which makes every operation and
/// every batch atomic. Data is not persisted across restarts.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.lock()?;
        Ok(inner
            .live(key, Instant::now())
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock()?.apply(WriteOp::set(key, value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let existed = inner.live(key, Instant::now()).is_some();
        inner.keys.remove(key);
        Ok(existed)
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<(), StoreError> {
        self.lock()?.apply(WriteOp::set_add(set, member));
        Ok(())
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<(), StoreError> {
        self.lock()?.apply(WriteOp::set_remove(set, member));
        Ok(())
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let now = Instant::now();
        if inner.live(key, now).is_some() {
            return Ok(false);
        }
        inner.keys.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let held = inner
            .live(key, Instant::now())
            .is_some_and(|entry| entry.value == expected);
        if held {
            inner.keys.remove(key);
        }
        Ok(held)
    }

    async fn expire_if_equals(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let now = Instant::now();
        match inner.live(key, now) {
            Some(entry) if entry.value == expected => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        for op in ops {
            inner.apply(op);
        }
        Ok(())
    }
}
