//! SQLite store integration tests.
//!
//! Two pools opened on one database file stand in for two processes.

use chrono::Utc;
use keel::testing::{CountingTask, SlowTask};
use keel::{
    Dispatcher, ExecutionEngine, ExecutionOutcome, HolderId, JobService, JobStatus, NewJob,
    SchedulerContext, SqliteStore, TaskRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn open_replica(
    path: &std::path::Path,
    holder: &str,
    registry: TaskRegistry,
) -> Arc<SchedulerContext<SqliteStore>> {
    let store = Arc::new(SqliteStore::new(path).await.unwrap());
    Arc::new(SchedulerContext::new(store, registry).with_holder(HolderId::new(holder)))
}

/// Test: A job submitted by one process is visible to and run by another.
#[tokio::test]
async fn test_job_survives_across_connections() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("keel.db");
    let task = CountingTask::new();

    let submitter = open_replica(&path, "replica-a", TaskRegistry::with_builtins()).await;
    let job = JobService::new(Arc::clone(&submitter))
        .create_job(NewJob::new("nightly", "2020-01-01T00:00:00Z", "count"))
        .await;
    // The submitter does not know the handler
    assert!(job.is_err());

    let registry = TaskRegistry::with_builtins().with_handler("count", task.clone());
    let worker = open_replica(&path, "replica-b", registry).await;
    let worker_service = JobService::new(Arc::clone(&worker));
    let job = worker_service
        .create_job(NewJob::new("nightly", "2020-01-01T00:00:00Z", "count"))
        .await
        .unwrap();

    let submitter_service = JobService::new(Arc::clone(&submitter));
    assert_eq!(submitter_service.get_job(job.id()).await.unwrap(), job);

    let dispatcher = Dispatcher::new(Arc::clone(&worker));
    let report = dispatcher.tick(Utc::now()).await.unwrap();
    dispatcher.await_running_jobs().await;

    assert_eq!(report.dispatched, 1);
    assert_eq!(task.runs(), 1);
    let done = submitter_service.get_job(job.id()).await.unwrap();
    assert_eq!(done.status(), JobStatus::Completed);
    assert!(submitter_service.pending_jobs().await.unwrap().is_empty());
}

/// Test: Two processes executing one job through SQLite: exactly one runs it.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_execute_across_connections() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("keel.db");
    let task = SlowTask::new(Duration::from_millis(200));
    let registry = TaskRegistry::new().with_handler("slow", task.clone());

    let replica_a = open_replica(&path, "replica-a", registry.clone()).await;
    let replica_b = open_replica(&path, "replica-b", registry).await;

    let job = JobService::new(Arc::clone(&replica_a))
        .create_job(NewJob::new("shared", "@daily", "slow"))
        .await
        .unwrap();

    let runs: Vec<_> = [replica_a, replica_b]
        .into_iter()
        .map(|ctx| {
            let job = job.clone();
            tokio::spawn(async move {
                let holder = ctx.holder().clone();
                ExecutionEngine::new(ctx).execute(&job, &holder).await
            })
        })
        .collect();

    let mut completed = 0;
    let mut not_acquired = 0;
    for run in runs {
        match run.await.unwrap().unwrap() {
            ExecutionOutcome::Completed { .. } => completed += 1,
            ExecutionOutcome::NotAcquired => not_acquired += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(completed, 1);
    assert_eq!(not_acquired, 1);
    assert_eq!(task.runs(), 1);
}
