//! API request handlers.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::core::job::{Job, NewJob};
use crate::core::types::JobId;
use crate::dispatcher::{DispatcherError, DispatcherHandle};
use crate::execution::{ExecutionError, ExecutionOutcome};
use crate::service::JobService;
use crate::storage::Store;

use super::errors::ApiError;
use super::responses::{
    DispatcherStateResponse, ExecuteResponse, HealthResponse, JobListResponse, MessageResponse,
};

/// Shared application state for API handlers.
pub struct ApiState<S> {
    pub handle: DispatcherHandle,
    pub service: JobService<S>,
}

impl<S> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            service: self.service.clone(),
        }
    }
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Get dispatcher state.
pub async fn get_dispatcher_state<S: Store + 'static>(
    State(state): State<ApiState<S>>,
) -> Json<DispatcherStateResponse> {
    let dispatcher_state = state.handle.state().await;
    Json(DispatcherStateResponse::from(dispatcher_state))
}

/// Pause the dispatcher.
pub async fn pause_dispatcher<S: Store + 'static>(
    State(state): State<ApiState<S>>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.handle.pause().await?;
    Ok(Json(MessageResponse {
        message: "dispatcher paused".to_string(),
    }))
}

/// Resume the dispatcher.
pub async fn resume_dispatcher<S: Store + 'static>(
    State(state): State<ApiState<S>>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.handle.resume().await?;
    Ok(Json(MessageResponse {
        message: "dispatcher resumed".to_string(),
    }))
}

/// Create a job.
pub async fn create_job<S: Store + 'static>(
    State(state): State<ApiState<S>>,
    payload: Result<Json<NewJob>, JsonRejection>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let Json(new) = payload?;
    let job = state.service.create_job(new).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// List pending jobs, soonest first.
pub async fn list_jobs<S: Store + 'static>(
    State(state): State<ApiState<S>>,
) -> Result<Json<JobListResponse>, ApiError> {
    let jobs = state.service.pending_jobs().await?;
    Ok(Json(JobListResponse::from(jobs)))
}

/// Get a specific job.
pub async fn get_job<S: Store + 'static>(
    State(state): State<ApiState<S>>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job = state.service.get_job(&JobId::new(job_id)).await?;
    Ok(Json(job))
}

/// Remove a job and its index entries.
pub async fn delete_job<S: Store + 'static>(
    State(state): State<ApiState<S>>,
    Path(job_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let job_id = JobId::new(job_id);
    state.service.remove_job(&job_id).await?;
    Ok(Json(MessageResponse {
        message: format!("job '{}' removed", job_id),
    }))
}

/// Execute a job now.
///
/// A task failure is a normal result here: the failure has been recorded on
/// the job, so it is reported with 200 and the updated record.
pub async fn execute_job<S: Store + 'static>(
    State(state): State<ApiState<S>>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let job_id = JobId::new(job_id);
    match state.handle.trigger(job_id.clone()).await {
        Ok(ExecutionOutcome::Completed { job, .. }) | Ok(ExecutionOutcome::Recovered { job, .. }) => {
            Ok(Json(ExecuteResponse::completed(job)).into_response())
        }
        Ok(ExecutionOutcome::NotAcquired) => Err(ApiError::Conflict(format!(
            "job '{}' is being executed by another holder",
            job_id
        ))),
        Ok(ExecutionOutcome::Skipped(reason)) => Err(ApiError::Conflict(format!(
            "job '{}' was not executed: {:?}",
            job_id, reason
        ))),
        Err(DispatcherError::Execution(ExecutionError::Task { job, source })) => {
            Ok(Json(ExecuteResponse::failed(*job, source.to_string())).into_response())
        }
        Err(e) => Err(e.into()),
    }
}
