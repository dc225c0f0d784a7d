//! Recovery scenario integration tests.
//!
//! A replica that dies mid-execution leaves its job `running` with a lease
//! that eventually expires. These tests check that another replica picks the
//! job back up through the failure path.

use chrono::Utc;
use keel::testing::{CountingTask, TestHarness};
use keel::{BackoffPolicy, Dispatcher, ExecutionOutcome, InMemoryStore, Job, JobStatus};
use std::sync::Arc;
use std::time::Duration;

const LEASE_TTL: Duration = Duration::from_secs(30);

/// Put `job` in the state a replica leaves behind when it crashes mid-run.
async fn crash_while_running(crashed: &keel::testing::Harness, job: &Job) {
    assert!(
        crashed
            .ctx
            .locks()
            .acquire(job.id(), crashed.holder(), LEASE_TTL)
            .await
            .unwrap()
    );
    let mut running = crashed.service.get_job(job.id()).await.unwrap();
    running.start(crashed.holder(), Utc::now()).unwrap();
    crashed.ctx.jobs().save(&running).await.unwrap();
}

/// Test: An abandoned job is recovered only after its lease expires.
#[tokio::test(start_paused = true)]
async fn test_abandoned_job_recovered_after_lease_expiry() {
    let store = Arc::new(InMemoryStore::new());
    let task = CountingTask::new();
    let crashed = TestHarness::new()
        .with_handler("count", task.clone())
        .with_holder("replica-a")
        .with_lease_ttl(LEASE_TTL)
        .build_with_store(Arc::clone(&store));
    let survivor = TestHarness::new()
        .with_handler("count", task.clone())
        .with_holder("replica-b")
        .with_lease_ttl(LEASE_TTL)
        .with_backoff(BackoffPolicy::fixed(Duration::ZERO))
        .build_with_store(Arc::clone(&store));

    let job = crashed.submit("orphan", "2020-01-01", "count").await.unwrap();
    crash_while_running(&crashed, &job).await;

    let dispatcher = Dispatcher::new(Arc::clone(&survivor.ctx));

    // The lease is still live: the job may just be slow
    let report = dispatcher.tick(Utc::now()).await.unwrap();
    assert_eq!(report.recovered, 0);
    assert_eq!(
        survivor.service.get_job(job.id()).await.unwrap().status(),
        JobStatus::Running
    );

    tokio::time::advance(LEASE_TTL + Duration::from_secs(1)).await;

    let report = dispatcher.tick(Utc::now()).await.unwrap();
    assert_eq!(report.recovered, 1);
    let recovered = survivor.service.get_job(job.id()).await.unwrap();
    assert_eq!(recovered.status(), JobStatus::Pending);
    assert_eq!(recovered.retry_count(), 1);
    assert!(recovered.owner_id().is_none());

    // The next scan runs it
    let report = dispatcher.tick(Utc::now()).await.unwrap();
    dispatcher.await_running_jobs().await;
    assert_eq!(report.dispatched, 1);
    assert_eq!(task.runs(), 1);

    let done = survivor.service.get_job(job.id()).await.unwrap();
    assert_eq!(done.status(), JobStatus::Completed);
    assert_eq!(done.retry_count(), 0);
}

/// Test: Repeated crashes count against maxRetries.
#[tokio::test(start_paused = true)]
async fn test_repeated_crashes_exhaust_retries() {
    let store = Arc::new(InMemoryStore::new());
    let crashed = TestHarness::new()
        .with_holder("replica-a")
        .with_lease_ttl(LEASE_TTL)
        .build_with_store(Arc::clone(&store));
    let survivor = TestHarness::new()
        .with_holder("replica-b")
        .with_lease_ttl(LEASE_TTL)
        .build_with_store(Arc::clone(&store));

    let job = crashed.submit("cursed", "2020-01-01", "noop").await.unwrap();

    let mut last = None;
    for _ in 0..3 {
        crash_while_running(&crashed, &job).await;
        tokio::time::advance(LEASE_TTL + Duration::from_secs(1)).await;
        last = Some(
            survivor
                .engine
                .recover(job.id(), survivor.holder())
                .await
                .unwrap(),
        );
    }

    assert!(matches!(last, Some(ExecutionOutcome::Recovered { .. })));
    let stored = survivor.service.get_job(job.id()).await.unwrap();
    assert_eq!(stored.status(), JobStatus::Failed);
    assert_eq!(stored.retry_count(), 3);
    assert!(survivor.ctx.jobs().running_ids().await.unwrap().is_empty());
}

/// Test: A live heartbeat keeps a long task from being recovered.
#[tokio::test(start_paused = true)]
async fn test_heartbeat_prevents_recovery_of_live_job() {
    let store = Arc::new(InMemoryStore::new());
    let slow = keel::testing::SlowTask::new(Duration::from_secs(10));
    let busy = TestHarness::new()
        .with_handler("slow", slow.clone())
        .with_holder("replica-a")
        .with_lease_ttl(Duration::from_secs(3))
        .with_heartbeat_interval(Duration::from_secs(1))
        .build_with_store(Arc::clone(&store));
    let watcher = TestHarness::new()
        .with_holder("replica-b")
        .with_lease_ttl(Duration::from_secs(3))
        .build_with_store(Arc::clone(&store));

    let job = busy.submit("long", "2020-01-01", "slow").await.unwrap();
    let running = {
        let engine = busy.engine.clone();
        let holder = busy.holder().clone();
        let job = job.clone();
        tokio::spawn(async move { engine.execute(&job, &holder).await })
    };

    let dispatcher = Dispatcher::new(Arc::clone(&watcher.ctx));
    for _ in 0..8 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let report = dispatcher.tick(Utc::now()).await.unwrap();
        assert_eq!(report.recovered, 0);
    }

    let outcome = running.await.unwrap().unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));
    assert_eq!(slow.runs(), 1);
}
