//! HTTP API module for the keel scheduler.
//!
//! Provides REST endpoints for submitting jobs, executing them on demand, and
//! controlling the dispatcher.

mod errors;
mod handlers;
mod responses;

pub use errors::{ApiError, ErrorResponse};
pub use handlers::ApiState;
pub use responses::*;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::dispatcher::DispatcherHandle;
use crate::service::JobService;
use crate::storage::Store;

/// Build the API router with all endpoints.
pub fn build_router<S: Store + 'static>(state: ApiState<S>) -> Router {
    Router::new()
        // Health check
        .route("/api/health", get(handlers::health))
        // Dispatcher control
        .route(
            "/api/dispatcher/state",
            get(handlers::get_dispatcher_state::<S>),
        )
        .route(
            "/api/dispatcher/pause",
            post(handlers::pause_dispatcher::<S>),
        )
        .route(
            "/api/dispatcher/resume",
            post(handlers::resume_dispatcher::<S>),
        )
        // Jobs
        .route(
            "/api/jobs",
            get(handlers::list_jobs::<S>).post(handlers::create_job::<S>),
        )
        .route(
            "/api/jobs/{job_id}",
            get(handlers::get_job::<S>).delete(handlers::delete_job::<S>),
        )
        .route(
            "/api/jobs/{job_id}/execute",
            post(handlers::execute_job::<S>),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Create the API state from the dispatcher handle and job service.
pub fn create_api_state<S: Store>(handle: DispatcherHandle, service: JobService<S>) -> ApiState<S> {
    ApiState { handle, service }
}

/// Start the API server.
///
/// This function spawns the server and returns a handle to the task.
/// The server runs until the task is aborted or the process exits.
pub async fn start_server<S: Store + 'static>(
    config: ApiConfig,
    state: ApiState<S>,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let router = build_router(state);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "API server listening");

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    Ok(handle)
}
