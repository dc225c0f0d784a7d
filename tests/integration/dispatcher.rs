//! Dispatcher integration tests.
//!
//! Run the dispatcher loop against jobs submitted through the service and
//! observe the results in the store.

use crate::common::{wait_for_job_status, wait_until};
use keel::testing::{CountingTask, FailingTask, SlowTask, TestHarness};
use keel::{
    BackoffPolicy, Dispatcher, DispatcherError, DispatcherState, ExecutionOutcome, JobStatus,
};
use std::sync::Arc;
use std::time::Duration;

/// Test: The loop picks up a due job and completes it.
#[tokio::test]
async fn test_dispatcher_completes_due_job() {
    let task = CountingTask::new();
    let harness = TestHarness::new().with_handler("count", task.clone()).build();
    let job = harness.submit("due", "2020-01-01", "count").await.unwrap();

    let (handle, dispatcher_task) = Dispatcher::new(Arc::clone(&harness.ctx))
        .with_poll_interval(Duration::from_millis(20))
        .start()
        .await;

    let done = wait_for_job_status(
        &harness.service,
        job.id(),
        JobStatus::Completed,
        Duration::from_secs(5),
    )
    .await;

    handle.shutdown().await.unwrap();
    let _ = dispatcher_task.await;

    assert_eq!(task.runs(), 1);
    assert!(done.next_run_at().is_none());
    assert_eq!(handle.state().await, DispatcherState::Stopped);
}

/// Test: A failing job is retried by the loop until it is failed.
#[tokio::test]
async fn test_dispatcher_retries_until_failed() {
    let task = FailingTask::new("unreachable host");
    let harness = TestHarness::new()
        .with_handler("fail", task.clone())
        .with_backoff(BackoffPolicy::fixed(Duration::ZERO))
        .build();
    let job = harness.submit("doomed", "2020-01-01", "fail").await.unwrap();

    let (handle, dispatcher_task) = Dispatcher::new(Arc::clone(&harness.ctx))
        .with_poll_interval(Duration::from_millis(20))
        .start()
        .await;

    let failed = wait_for_job_status(
        &harness.service,
        job.id(),
        JobStatus::Failed,
        Duration::from_secs(5),
    )
    .await;

    handle.shutdown().await.unwrap();
    let _ = dispatcher_task.await;

    assert_eq!(failed.retry_count(), 3);
    assert_eq!(task.runs(), 3);
}

/// Test: A failing job does not hold up healthy ones.
#[tokio::test]
async fn test_failing_job_isolated_from_healthy_jobs() {
    let counting = CountingTask::new();
    let harness = TestHarness::new()
        .with_handler("count", counting.clone())
        .with_handler("fail", FailingTask::new("boom"))
        .build();
    harness.submit("bad", "2020-01-01", "fail").await.unwrap();
    let good = harness.submit("good-1", "2020-01-02", "count").await.unwrap();
    let also_good = harness.submit("good-2", "2020-01-03", "count").await.unwrap();

    let (handle, dispatcher_task) = Dispatcher::new(Arc::clone(&harness.ctx))
        .with_poll_interval(Duration::from_millis(20))
        .start()
        .await;

    for job in [&good, &also_good] {
        wait_for_job_status(
            &harness.service,
            job.id(),
            JobStatus::Completed,
            Duration::from_secs(5),
        )
        .await;
    }

    handle.shutdown().await.unwrap();
    let _ = dispatcher_task.await;

    assert_eq!(counting.runs(), 2);
}

/// Test: The loop never runs more jobs at once than the limit.
#[tokio::test]
async fn test_dispatcher_respects_concurrency_limit() {
    let task = SlowTask::new(Duration::from_millis(50));
    let harness = TestHarness::new().with_handler("slow", task.clone()).build();
    for i in 0..6 {
        harness
            .submit(&format!("slow-{}", i), "2020-01-01", "slow")
            .await
            .unwrap();
    }

    let (handle, dispatcher_task) = Dispatcher::new(Arc::clone(&harness.ctx))
        .with_poll_interval(Duration::from_millis(10))
        .with_max_concurrent_jobs(2)
        .start()
        .await;

    wait_until(Duration::from_secs(5), || task.runs() == 6).await;

    handle.shutdown().await.unwrap();
    let _ = dispatcher_task.await;

    assert_eq!(task.peak_concurrency(), 2);
}

/// Test: A paused dispatcher leaves due jobs alone but still runs triggers.
#[tokio::test]
async fn test_paused_dispatcher_still_serves_triggers() {
    let task = CountingTask::new();
    let harness = TestHarness::new().with_handler("count", task.clone()).build();

    let (handle, dispatcher_task) = Dispatcher::new(Arc::clone(&harness.ctx))
        .with_poll_interval(Duration::from_millis(10))
        .start()
        .await;
    handle.pause().await.unwrap();

    let due = harness.submit("due", "2020-01-01", "count").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(task.runs(), 0);

    let outcome = handle.trigger(due.id().clone()).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));
    assert_eq!(task.runs(), 1);

    let missing = handle.trigger("missing").await;
    assert!(matches!(missing, Err(DispatcherError::JobNotFound(_))));

    handle.shutdown().await.unwrap();
    let _ = dispatcher_task.await;
}

/// Test: Shutdown lets an in-flight job finish.
#[tokio::test]
async fn test_shutdown_waits_for_in_flight_job() {
    let task = SlowTask::new(Duration::from_millis(300));
    let harness = TestHarness::new().with_handler("slow", task.clone()).build();
    let job = harness.submit("slow", "2020-01-01", "slow").await.unwrap();

    let (handle, dispatcher_task) = Dispatcher::new(Arc::clone(&harness.ctx))
        .with_poll_interval(Duration::from_millis(10))
        .start()
        .await;

    wait_for_job_status(
        &harness.service,
        job.id(),
        JobStatus::Running,
        Duration::from_secs(5),
    )
    .await;

    handle.shutdown().await.unwrap();
    let _ = dispatcher_task.await;

    assert_eq!(task.runs(), 1);
    let stored = harness.service.get_job(job.id()).await.unwrap();
    assert_eq!(stored.status(), JobStatus::Completed);
    assert_eq!(harness.ctx.locks().holder(job.id()).await.unwrap(), None);
}
