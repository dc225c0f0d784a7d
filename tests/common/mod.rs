//! Common test utilities shared across integration tests.

use keel::{Job, JobId, JobService, JobStatus, Store};
use std::time::Duration;

/// Wait for a job to reach an expected status, polling the store.
///
/// This is more reliable than fixed sleeps since execution time can vary.
/// Polls every 10ms and times out after the specified duration.
///
/// # Panics
///
/// Panics if the timeout is reached before the job reaches the expected status.
pub async fn wait_for_job_status<S: Store>(
    service: &JobService<S>,
    job_id: &JobId,
    expected: JobStatus,
    timeout: Duration,
) -> Job {
    let start = tokio::time::Instant::now();
    loop {
        let job = service.get_job(job_id).await.unwrap();
        if job.status() == expected {
            return job;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for job {} to reach {}, current status: {}",
                job_id,
                expected,
                job.status()
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
///
/// # Panics
///
/// Panics on timeout.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let start = tokio::time::Instant::now();
    while !condition() {
        if start.elapsed() > timeout {
            panic!("Timeout after {:?} waiting for condition", timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
