//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the store, the
//! dispatcher, leases, retries and the HTTP API.

mod error;
mod types;

pub use error::ConfigError;
pub use types::{
    ApiConfig, DispatcherConfig, KeelConfig, LeaseConfig, RetryConfig, StoreConfig,
};
