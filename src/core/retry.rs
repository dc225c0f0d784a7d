//! Backoff policies applied between failed attempts.
//!
//! The retry bound itself lives on each job (`maxRetries`); this module only
//! decides how long a failed job waits before it becomes ready again.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default delay before a failed job is retried.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

/// Computes the delay before the next attempt.
pub trait Backoff: Send + Sync {
    /// Delay for a job whose `retry_count` has just been incremented.
    ///
    /// `retry_count` is 1 after the first failure.
    fn delay(&self, retry_count: u32) -> Duration;
}

/// Configurable backoff policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Same delay after every failure.
    Fixed {
        #[serde(rename = "delay_ms", with = "serde_millis")]
        delay: Duration,
    },

    /// `initial * multiplier^(retry_count - 1)`, capped at `max`.
    Exponential {
        #[serde(rename = "initial_ms", with = "serde_millis")]
        initial: Duration,
        multiplier: f64,
        #[serde(rename = "max_ms", with = "serde_millis")]
        max: Duration,
    },
}

impl BackoffPolicy {
    /// Create a fixed delay policy.
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    /// Create an exponential policy.
    pub fn exponential(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self::Exponential {
            initial,
            multiplier,
            max,
        }
    }

    /// Check the policy parameters.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Fixed { .. } => Ok(()),
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => {
                if !multiplier.is_finite() || *multiplier < 1.0 {
                    return Err(format!(
                        "backoff multiplier must be a finite number >= 1.0, got {}",
                        multiplier
                    ));
                }
                if max < initial {
                    return Err(format!(
                        "backoff max ({:?}) must not be below initial ({:?})",
                        max, initial
                    ));
                }
                Ok(())
            }
        }
    }
}

impl Default for BackoffPolicy {
    /// Fixed one minute delay.
    fn default() -> Self {
        Self::fixed(DEFAULT_BACKOFF)
    }
}

impl Backoff for BackoffPolicy {
    fn delay(&self, retry_count: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let exponent = retry_count.saturating_sub(1).min(i32::MAX as u32) as i32;
                let scaled = initial.as_secs_f64() * multiplier.powi(exponent);
                let capped = scaled.min(max.as_secs_f64());
                if capped.is_finite() && capped >= 0.0 {
                    Duration::from_secs_f64(capped)
                } else {
                    *max
                }
            }
        }
    }
}

/// Serde helper for Duration serialization.
///
/// Serializes Duration as whole milliseconds.
pub(crate) mod serde_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
