//! API response types.

use serde::Serialize;

use crate::core::job::Job;
use crate::dispatcher::DispatcherState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Dispatcher state response.
#[derive(Debug, Serialize)]
pub struct DispatcherStateResponse {
    pub state: DispatcherState,
    pub is_running: bool,
    pub is_paused: bool,
}

impl From<DispatcherState> for DispatcherStateResponse {
    fn from(state: DispatcherState) -> Self {
        Self {
            state,
            is_running: state == DispatcherState::Running,
            is_paused: state == DispatcherState::Paused,
        }
    }
}

/// List of jobs response.
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
    pub count: usize,
}

impl From<Vec<Job>> for JobListResponse {
    fn from(jobs: Vec<Job>) -> Self {
        Self {
            count: jobs.len(),
            jobs,
        }
    }
}

/// Result of a manual execution.
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    /// `completed` or `failed`.
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The job as persisted after the attempt.
    pub job: Job,
}

impl ExecuteResponse {
    pub fn completed(job: Job) -> Self {
        Self {
            outcome: "completed",
            error: None,
            job,
        }
    }

    pub fn failed(job: Job, error: String) -> Self {
        Self {
            outcome: "failed",
            error: Some(error),
            job,
        }
    }
}

/// Simple message response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
