//! Configuration type definitions.
//!
//! `keel.yaml` has one section per concern. Every section and every field is
//! optional; missing values take the defaults below.
//!
//! ```yaml
//! store:
//!   type: sqlite
//!   path: keel.db
//! dispatcher:
//!   poll_interval_ms: 1000
//!   max_concurrent_jobs: 4
//!   shutdown_timeout_secs: 30
//! lease:
//!   ttl_secs: 300
//!   heartbeat_secs: 60
//! retry:
//!   default_max_retries: 3
//!   backoff:
//!     type: exponential
//!     initial_ms: 1000
//!     multiplier: 2.0
//!     max_ms: 60000
//! api:
//!   host: 127.0.0.1
//!   port: 8565
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::context::SchedulerContext;
use crate::core::retry::BackoffPolicy;
use crate::core::task::TaskRegistry;
use crate::dispatcher::Dispatcher;
use crate::storage::Store;

use super::error::ConfigError;

/// Top-level configuration (keel.yaml).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    /// Backing store.
    pub store: StoreConfig,
    /// Dispatcher loop settings.
    pub dispatcher: DispatcherConfig,
    /// Lease settings.
    pub lease: LeaseConfig,
    /// Retry defaults.
    pub retry: RetryConfig,
    /// HTTP API settings.
    pub api: ApiConfig,
}

/// Store configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In-memory store (default, non-persistent, single process).
    #[default]
    Memory,
    /// SQLite database file, shareable between processes on one host.
    Sqlite {
        /// Path to the database file.
        path: String,
    },
    /// Redis server.
    Redis {
        /// Connection URL, e.g. `redis://127.0.0.1/`.
        url: String,
    },
}

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Interval between scans, in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum jobs executing at once on this replica.
    pub max_concurrent_jobs: usize,
    /// How long shutdown waits for running jobs, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_concurrent_jobs: 4,
            shutdown_timeout_secs: 30,
        }
    }
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Lease configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Lease time-to-live, in seconds.
    pub ttl_secs: u64,
    /// Extend the lease this often while a task runs, in seconds.
    pub heartbeat_secs: Option<u64>,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            heartbeat_secs: None,
        }
    }
}

impl LeaseConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_secs.map(Duration::from_secs)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retry bound for jobs submitted without `maxRetries`.
    pub default_max_retries: u32,
    /// Delay applied after each failure.
    pub backoff: BackoffPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_max_retries: crate::core::job::DEFAULT_MAX_RETRIES,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Configuration for the API server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8565,
        }
    }
}

impl ApiConfig {
    /// Create a new API config with custom host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl KeelConfig {
    /// Load configuration from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document means "all defaults"
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.store {
            StoreConfig::Sqlite { path } if path.trim().is_empty() => {
                return Err(ConfigError::InvalidConfig(
                    "store.path cannot be empty".into(),
                ));
            }
            StoreConfig::Redis { url } if url.trim().is_empty() => {
                return Err(ConfigError::InvalidConfig("store.url cannot be empty".into()));
            }
            _ => {}
        }

        if self.dispatcher.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "dispatcher.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.dispatcher.max_concurrent_jobs == 0 {
            return Err(ConfigError::InvalidConfig(
                "dispatcher.max_concurrent_jobs cannot be zero".into(),
            ));
        }

        if self.lease.ttl_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "lease.ttl_secs must be greater than zero".into(),
            ));
        }
        if let Some(heartbeat) = self.lease.heartbeat_secs {
            // A heartbeat slower than the TTL lets the lease lapse mid-run
            if heartbeat == 0 || heartbeat >= self.lease.ttl_secs {
                return Err(ConfigError::InvalidConfig(format!(
                    "lease.heartbeat_secs must be between 1 and {} (ttl_secs - 1), got {}",
                    self.lease.ttl_secs.saturating_sub(1),
                    heartbeat
                )));
            }
        }

        if self.retry.default_max_retries == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry.default_max_retries must be at least 1".into(),
            ));
        }
        self.retry
            .backoff
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(format!("retry.backoff: {}", e)))?;

        Ok(())
    }

    /// Build a scheduler context with the lease and retry settings applied.
    pub fn scheduler_context<S: Store>(
        &self,
        store: Arc<S>,
        registry: TaskRegistry,
    ) -> SchedulerContext<S> {
        let mut ctx = SchedulerContext::new(store, registry)
            .with_lease_ttl(self.lease.ttl())
            .with_backoff(self.retry.backoff.clone())
            .with_default_max_retries(self.retry.default_max_retries);
        if let Some(interval) = self.lease.heartbeat_interval() {
            ctx = ctx.with_heartbeat_interval(interval);
        }
        ctx
    }

    /// Build a dispatcher with the loop settings applied.
    pub fn dispatcher<S: Store + 'static>(
        &self,
        ctx: Arc<SchedulerContext<S>>,
    ) -> Dispatcher<S> {
        Dispatcher::new(ctx)
            .with_poll_interval(self.dispatcher.poll_interval())
            .with_max_concurrent_jobs(self.dispatcher.max_concurrent_jobs)
            .with_shutdown_timeout(self.dispatcher.shutdown_timeout())
    }
}
