//! The persisted job record and its lifecycle state machine.
//!
//! Transitions are pure methods that take the current instant, so they can be
//! exercised without a store or a clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::retry::Backoff;
use super::schedule::{Schedule, ScheduleError, ScheduleKind};
use super::types::{HolderId, JobId, TaskRef};

/// Default bound on attempts for a new job.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Errors that can occur when working with jobs.
#[derive(Debug, Error)]
pub enum JobError {
    /// Name is empty after trimming.
    #[error("job name is required")]
    MissingName,

    /// Task reference is empty.
    #[error("task reference is required")]
    MissingTaskRef,

    /// Task reference does not name a registered handler.
    #[error("unknown task '{0}'")]
    UnknownTask(TaskRef),

    /// The effective retry bound is zero, so the job could never be dispatched.
    #[error("maxRetries must be at least 1, got {0}")]
    InvalidMaxRetries(u32),

    /// Invalid schedule.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// Transition not allowed from the current status.
    #[error("cannot {action} job in status {from}")]
    InvalidTransition {
        from: JobStatus,
        action: &'static str,
    },

    /// Record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the pending index for its next run.
    Pending,
    /// A replica holds the lease and is running the task.
    Running,
    /// Finished with no further runs scheduled.
    Completed,
    /// Exhausted its retries.
    Failed,
}

impl JobStatus {
    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Lowercase name used in the external representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated-on-create job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub name: String,
    pub schedule: String,
    pub task_ref: TaskRef,
    /// Retry bound; absent or 0 takes the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl NewJob {
    /// Create a submission using the default retry bound.
    pub fn new(
        name: impl Into<String>,
        schedule: impl Into<String>,
        task_ref: impl Into<TaskRef>,
    ) -> Self {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            task_ref: task_ref.into(),
            max_retries: None,
        }
    }

    /// Builder: set the retry bound.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "nextRunAt")]
pub enum Completion {
    /// No further runs; the job is `Completed`.
    Finished,
    /// Recurring job re-armed to `Pending` for the given instant.
    Rescheduled(DateTime<Utc>),
}

/// Result of a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back in `Pending`, ready again at `next_run_at`.
    Retrying {
        retry_count: u32,
        next_run_at: DateTime<Utc>,
    },
    /// Terminal `Failed`.
    Exhausted { retry_count: u32 },
}

/// The persisted unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    id: JobId,
    name: String,
    schedule: Schedule,
    task_ref: TaskRef,
    status: JobStatus,
    max_retries: u32,
    retry_count: u32,
    last_run_at: Option<DateTime<Utc>>,
    next_run_at: Option<DateTime<Utc>>,
    owner_id: Option<HolderId>,
}

impl Job {
    /// Validate a submission and build a `Pending` job with its first run time.
    ///
    /// The task reference is only checked for presence here; resolving it
    /// against a registry is the caller's concern.
    pub fn create(
        new: NewJob,
        default_max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, JobError> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(JobError::MissingName);
        }
        if new.task_ref.as_str().trim().is_empty() {
            return Err(JobError::MissingTaskRef);
        }

        // An explicit 0 means "use the default"
        let max_retries = match new.max_retries {
            Some(0) | None => default_max_retries,
            Some(n) => n,
        };
        if max_retries == 0 {
            return Err(JobError::InvalidMaxRetries(max_retries));
        }

        let schedule = Schedule::parse(&new.schedule)?;
        let next_run_at = schedule
            .next_run(now)
            .ok_or_else(|| ScheduleError::NoMoreOccurrences(schedule.to_string()))?;

        Ok(Self {
            id: JobId::generate(),
            name: name.to_string(),
            schedule,
            task_ref: new.task_ref,
            status: JobStatus::Pending,
            max_retries,
            retry_count: 0,
            last_run_at: None,
            next_run_at: Some(next_run_at),
            owner_id: None,
        })
    }

    /// `Pending -> Running` under the lease held by `holder`.
    pub fn start(&mut self, holder: &HolderId, now: DateTime<Utc>) -> Result<(), JobError> {
        self.require(JobStatus::Pending, "start")?;
        self.status = JobStatus::Running;
        self.owner_id = Some(holder.clone());
        self.last_run_at = Some(now);
        Ok(())
    }

    /// `Running -> Completed`, or back to `Pending` for a recurring schedule.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<Completion, JobError> {
        self.require(JobStatus::Running, "complete")?;
        self.retry_count = 0;
        self.owner_id = None;
        self.next_run_at = self.schedule.next_after_completion(now);

        Ok(match self.next_run_at {
            Some(at) => {
                self.status = JobStatus::Pending;
                Completion::Rescheduled(at)
            }
            None => {
                self.status = JobStatus::Completed;
                Completion::Finished
            }
        })
    }

    /// `Running -> Pending` with backoff, or `Running -> Failed` once the
    /// retry bound is reached.
    pub fn fail(
        &mut self,
        now: DateTime<Utc>,
        backoff: &dyn Backoff,
    ) -> Result<FailureOutcome, JobError> {
        self.require(JobStatus::Running, "fail")?;
        self.owner_id = None;
        self.retry_count = self.retry_count.saturating_add(1);

        if self.retry_count < self.max_retries {
            let next_run_at = add_delay(now, backoff.delay(self.retry_count));
            self.status = JobStatus::Pending;
            self.next_run_at = Some(next_run_at);
            Ok(FailureOutcome::Retrying {
                retry_count: self.retry_count,
                next_run_at,
            })
        } else {
            self.status = JobStatus::Failed;
            self.next_run_at = None;
            Ok(FailureOutcome::Exhausted {
                retry_count: self.retry_count,
            })
        }
    }

    /// Whether the dispatcher may run this job at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending
            && self.next_run_at.is_some_and(|at| at <= now)
            && self.retry_count < self.max_retries
    }

    fn require(&self, expected: JobStatus, action: &'static str) -> Result<(), JobError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(JobError::InvalidTransition {
                from: self.status,
                action,
            })
        }
    }

    /// Encode the record as a JSON string.
    pub fn to_json(&self) -> Result<String, JobError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a record from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self, JobError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Get the job ID.
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Get the job name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the schedule.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Whether the schedule fires once or repeatedly.
    pub fn schedule_kind(&self) -> ScheduleKind {
        self.schedule.kind()
    }

    /// Get the task reference.
    pub fn task_ref(&self) -> &TaskRef {
        &self.task_ref
    }

    /// Get the status.
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Get the retry bound.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Get the number of consecutive failed attempts.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Start time of the most recent run.
    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        self.last_run_at
    }

    /// Next eligible run time.
    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.next_run_at
    }

    /// Holder of the lease while running.
    pub fn owner_id(&self) -> Option<&HolderId> {
        self.owner_id.as_ref()
    }
}

fn add_delay(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
