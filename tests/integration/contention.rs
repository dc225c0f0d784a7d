//! Lease contention integration tests.
//!
//! Several replicas share one store; each test checks that a job is only
//! executed by the holder of its lease.

use keel::testing::{CountingTask, SlowTask, TestHarness};
use keel::{Dispatcher, ExecutionOutcome, HolderId, InMemoryStore, JobId, LockManager};
use std::sync::Arc;
use std::time::Duration;

/// Test: Concurrent acquires on one job grant exactly one lease.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_at_most_one_lease_holder() {
    let store = Arc::new(InMemoryStore::new());
    let locks = Arc::new(LockManager::new(Arc::clone(&store)));
    let job_id = JobId::new("contended");

    let attempts: Vec<_> = (0..32)
        .map(|i| {
            let locks = Arc::clone(&locks);
            let job_id = job_id.clone();
            tokio::spawn(async move {
                let holder = HolderId::new(format!("replica-{}", i));
                let won = locks
                    .acquire(&job_id, &holder, Duration::from_secs(30))
                    .await
                    .unwrap();
                (holder, won)
            })
        })
        .collect();

    let mut winners = Vec::new();
    for attempt in attempts {
        let (holder, won) = attempt.await.unwrap();
        if won {
            winners.push(holder);
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(locks.holder(&job_id).await.unwrap(), winners.pop());
}

/// Test: Two replicas executing one job: one completes, one is turned away.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_execute_single_winner() {
    let store = Arc::new(InMemoryStore::new());
    let task = SlowTask::new(Duration::from_millis(200));
    let replica_a = TestHarness::new()
        .with_handler("slow", task.clone())
        .with_holder("replica-a")
        .build_with_store(Arc::clone(&store));
    let replica_b = TestHarness::new()
        .with_handler("slow", task.clone())
        .with_holder("replica-b")
        .build_with_store(Arc::clone(&store));

    let job = replica_a.submit("shared", "@daily", "slow").await.unwrap();

    let run_a = {
        let engine = replica_a.engine.clone();
        let job = job.clone();
        let holder = replica_a.holder().clone();
        tokio::spawn(async move { engine.execute(&job, &holder).await })
    };
    let run_b = {
        let engine = replica_b.engine.clone();
        let job = job.clone();
        let holder = replica_b.holder().clone();
        tokio::spawn(async move { engine.execute(&job, &holder).await })
    };

    let outcomes = [
        run_a.await.unwrap().unwrap(),
        run_b.await.unwrap().unwrap(),
    ];

    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, ExecutionOutcome::Completed { .. }))
        .count();
    let not_acquired = outcomes
        .iter()
        .filter(|o| matches!(o, ExecutionOutcome::NotAcquired))
        .count();
    assert_eq!(completed, 1);
    assert_eq!(not_acquired, 1);
    assert_eq!(task.runs(), 1);
    assert_eq!(task.peak_concurrency(), 1);
}

/// Test: Two dispatchers scanning the same store run each job exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_dispatchers_run_each_job_once() {
    let store = Arc::new(InMemoryStore::new());
    let task = CountingTask::new();
    let replica_a = TestHarness::new()
        .with_handler("count", task.clone())
        .with_holder("replica-a")
        .build_with_store(Arc::clone(&store));
    let replica_b = TestHarness::new()
        .with_handler("count", task.clone())
        .with_holder("replica-b")
        .build_with_store(Arc::clone(&store));

    for i in 0..20 {
        replica_a
            .submit(&format!("job-{}", i), "2020-01-01T00:00:00Z", "count")
            .await
            .unwrap();
    }

    let dispatcher_a = Dispatcher::new(Arc::clone(&replica_a.ctx)).with_max_concurrent_jobs(8);
    let dispatcher_b = Dispatcher::new(Arc::clone(&replica_b.ctx)).with_max_concurrent_jobs(8);

    // Scan until every job has completed
    for _ in 0..20 {
        let now = chrono::Utc::now();
        let (a, b) = tokio::join!(dispatcher_a.tick(now), dispatcher_b.tick(now));
        a.unwrap();
        b.unwrap();
        dispatcher_a.await_running_jobs().await;
        dispatcher_b.await_running_jobs().await;
        if replica_a.service.pending_jobs().await.unwrap().is_empty() {
            break;
        }
    }

    assert_eq!(task.runs(), 20);
    assert!(replica_a.service.pending_jobs().await.unwrap().is_empty());
    assert!(replica_a.ctx.jobs().running_ids().await.unwrap().is_empty());
}
