//! API error types and HTTP status mapping.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::dispatcher::DispatcherError;
use crate::execution::ExecutionError;
use crate::service::ServiceError;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// The request body or a field in it was rejected.
    Validation(String),
    /// Resource not found.
    NotFound(String),
    /// Request conflict (e.g., the lease is held by another process).
    Conflict(String),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
            }
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(e) => ApiError::Validation(e.to_string()),
            ServiceError::NotFound(id) => ApiError::NotFound(format!("job not found: {}", id)),
            ServiceError::Busy(id) => {
                ApiError::Conflict(format!("job {} is executing, try again later", id))
            }
            ServiceError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<DispatcherError> for ApiError {
    fn from(err: DispatcherError) -> Self {
        match err {
            DispatcherError::JobNotFound(id) => {
                ApiError::NotFound(format!("job not found: {}", id))
            }
            DispatcherError::Execution(ExecutionError::Transition(e)) => {
                ApiError::Conflict(e.to_string())
            }
            DispatcherError::Execution(e) => ApiError::Internal(e.to_string()),
            DispatcherError::Store(e) => ApiError::Internal(e.to_string()),
            DispatcherError::ChannelError(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}
