//! API integration tests.
//!
//! These tests drive the router in-process with `tower::ServiceExt::oneshot`.

use keel::api::{ApiState, build_router, create_api_state};
use keel::testing::{FailingTask, Harness, TestHarness};
use keel::{Dispatcher, HolderId, InMemoryStore};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Create a test API state over a fresh store with a running dispatcher.
async fn create_test_state() -> (Harness, ApiState<InMemoryStore>) {
    let harness = TestHarness::new()
        .with_handler("fail", FailingTask::new("boom"))
        .build();
    let (handle, _task) = Dispatcher::new(Arc::clone(&harness.ctx)).start().await;
    let state = create_api_state(handle, harness.service.clone());
    (harness, state)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Test: Health endpoint responds with status ok.
#[tokio::test]
async fn test_health_endpoint() {
    let (_harness, state) = create_test_state().await;
    let router = build_router(state);

    let (status, json) = send(&router, get("/api/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

/// Test: Creating a job returns it with 201 and lists it as pending.
#[tokio::test]
async fn test_create_and_list_job() {
    let (_harness, state) = create_test_state().await;
    let router = build_router(state);

    let (status, created) = send(
        &router,
        post_json(
            "/api/jobs",
            json!({"name": "A", "schedule": "*/5 * * * *", "taskRef": "noop", "maxRetries": 3}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], "A");
    assert_eq!(created["status"], "pending");
    assert_eq!(created["taskRef"], "noop");
    assert_eq!(created["maxRetries"], 3);
    assert_eq!(created["retryCount"], 0);
    assert!(created["nextRunAt"].is_string());
    assert!(created["id"].is_string());

    let (status, listed) = send(&router, get("/api/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["jobs"][0]["id"], created["id"]);
}

/// Test: Validation failures return 400 and store nothing.
#[tokio::test]
async fn test_create_job_validation_errors() {
    let (_harness, state) = create_test_state().await;
    let router = build_router(state);

    let invalid = [
        json!({"name": "A", "schedule": "not-a-schedule", "taskRef": "noop"}),
        json!({"name": "", "schedule": "@daily", "taskRef": "noop"}),
        json!({"name": "A", "schedule": "@daily", "taskRef": "rm -rf /"}),
        json!({"name": "A", "schedule": "@daily", "taskRef": "noop", "maxRetries": -1}),
        json!({"name": "A", "schedule": "@daily"}),
    ];

    for body in invalid {
        let (status, json) = send(&router, post_json("/api/jobs", body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);
        assert_eq!(json["code"], "VALIDATION_ERROR");
        assert!(json["error"].is_string());
    }

    let (_, listed) = send(&router, get("/api/jobs")).await;
    assert_eq!(listed["count"], 0);
}

/// Test: Get and delete a job, then 404 once it is gone.
#[tokio::test]
async fn test_get_and_delete_job() {
    let (harness, state) = create_test_state().await;
    let router = build_router(state);
    let job = harness.submit("target", "@daily", "noop").await.unwrap();
    let uri = format!("/api/jobs/{}", job.id());

    let (status, fetched) = send(&router, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], job.id().as_str());

    let (status, _) = send(&router, delete(&uri)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(&router, get(&uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");

    let (status, _) = send(&router, delete(&uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Test: Manual execution reports success and failure with the updated job.
#[tokio::test]
async fn test_execute_job() {
    let (harness, state) = create_test_state().await;
    let router = build_router(state);
    let ok = harness.submit("ok", "2999-01-01", "noop").await.unwrap();
    let bad = harness.submit("bad", "2999-01-01", "fail").await.unwrap();

    let (status, json) = send(&router, post(&format!("/api/jobs/{}/execute", ok.id()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "completed");
    assert_eq!(json["job"]["status"], "completed");

    let (status, json) = send(&router, post(&format!("/api/jobs/{}/execute", bad.id()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "failed");
    assert!(json["error"].as_str().unwrap().contains("boom"));
    assert_eq!(json["job"]["retryCount"], 1);
    assert_eq!(json["job"]["status"], "pending");

    let (status, json) = send(&router, post("/api/jobs/missing/execute")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}

/// Test: Executing or deleting a job leased by another holder is a conflict.
#[tokio::test]
async fn test_execute_and_delete_under_foreign_lease() {
    let (harness, state) = create_test_state().await;
    let router = build_router(state);
    let job = harness.submit("busy", "2999-01-01", "noop").await.unwrap();
    harness
        .ctx
        .locks()
        .acquire(job.id(), &HolderId::new("elsewhere"), Duration::from_secs(60))
        .await
        .unwrap();

    let (status, json) = send(&router, post(&format!("/api/jobs/{}/execute", job.id()))).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "CONFLICT");

    let (status, json) = send(&router, delete(&format!("/api/jobs/{}", job.id()))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "CONFLICT");

    let stored = harness.service.get_job(job.id()).await.unwrap();
    assert_eq!(stored.retry_count(), 0);
}

/// Test: Dispatcher state, pause and resume.
#[tokio::test]
async fn test_dispatcher_control() {
    let (_harness, state) = create_test_state().await;
    let router = build_router(state);

    let (status, json) = send(&router, get("/api/dispatcher/state")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "running");
    assert_eq!(json["is_running"], true);
    assert_eq!(json["is_paused"], false);

    let (status, _) = send(&router, post("/api/dispatcher/pause")).await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = send(&router, get("/api/dispatcher/state")).await;
    assert_eq!(json["state"], "paused");
    assert_eq!(json["is_paused"], true);

    let (status, _) = send(&router, post("/api/dispatcher/resume")).await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = send(&router, get("/api/dispatcher/state")).await;
    assert_eq!(json["state"], "running");
}
