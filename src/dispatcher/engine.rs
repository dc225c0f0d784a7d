//! Dispatcher engine implementation.
//!
//! The dispatcher is responsible for:
//! - Scanning the pending index on every tick and running ready jobs
//! - Bounding how many jobs this replica executes at once
//! - Recovering running jobs abandoned by a crashed holder
//! - Manual triggers
//! - Pause, resume and graceful shutdown

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::context::SchedulerContext;
use crate::core::job::Job;
use crate::core::types::JobId;
use crate::execution::{ExecutionEngine, ExecutionError, ExecutionOutcome};
use crate::storage::{Store, StoreError};

use super::handle::{COMMAND_CHANNEL_BUFFER, DispatcherHandle};
use super::types::{DispatcherCommand, DispatcherError, DispatcherState, TickReport};

/// Default interval between scans of the pending index.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of jobs one replica executes at once.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

/// Default graceful shutdown timeout.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Polls the store for ready jobs and hands them to the execution engine.
pub struct Dispatcher<S> {
    engine: ExecutionEngine<S>,
    /// Interval between scans.
    poll_interval: Duration,
    /// Maximum jobs executing at once on this replica.
    max_concurrent_jobs: usize,
    /// Executions started by this replica and not yet reaped.
    in_flight: Arc<RwLock<HashMap<JobId, JoinHandle<()>>>>,
    /// Graceful shutdown timeout.
    shutdown_timeout: Duration,
}

impl<S: Store + 'static> Dispatcher<S> {
    /// Create a dispatcher over a shared context.
    pub fn new(ctx: Arc<SchedulerContext<S>>) -> Self {
        Self {
            engine: ExecutionEngine::new(ctx),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            in_flight: Arc::new(RwLock::new(HashMap::new())),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the maximum concurrent jobs.
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    /// Set the graceful shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// The execution engine jobs are dispatched to.
    pub fn engine(&self) -> &ExecutionEngine<S> {
        &self.engine
    }

    /// Start the dispatcher and return a handle for controlling it.
    pub async fn start(self) -> (DispatcherHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(DispatcherState::Running));

        let handle = DispatcherHandle {
            command_tx,
            state: Arc::clone(&state),
        };

        tracing::info!(
            holder = %self.engine.context().holder(),
            poll_interval = ?self.poll_interval,
            max_concurrent_jobs = self.max_concurrent_jobs,
            "dispatcher started"
        );

        let dispatcher_task = tokio::spawn(async move {
            self.run(command_rx, state).await;
        });

        (handle, dispatcher_task)
    }

    /// Main dispatcher loop.
    async fn run(
        self,
        mut command_rx: mpsc::Receiver<DispatcherCommand>,
        state: Arc<RwLock<DispatcherState>>,
    ) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let current_state = *state.read().await;
                    if current_state == DispatcherState::Running {
                        match self.tick(Utc::now()).await {
                            Ok(report) if report != TickReport::default() => {
                                tracing::debug!(?report, "dispatcher tick");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "dispatcher tick failed"),
                        }
                    } else {
                        self.cleanup_finished_jobs().await;
                    }
                }

                Some(command) = command_rx.recv() => {
                    match command {
                        DispatcherCommand::Trigger { job_id, response } => {
                            self.trigger_job(job_id, response).await;
                        }
                        DispatcherCommand::Pause { response } => {
                            let mut s = state.write().await;
                            *s = DispatcherState::Paused;
                            tracing::info!("dispatcher paused");
                            let _ = response.send(());
                        }
                        DispatcherCommand::Resume { response } => {
                            let mut s = state.write().await;
                            *s = DispatcherState::Running;
                            tracing::info!("dispatcher resumed");
                            let _ = response.send(());
                        }
                        DispatcherCommand::Shutdown { response } => {
                            let mut s = state.write().await;
                            *s = DispatcherState::Stopped;
                            drop(s);

                            self.await_running_jobs().await;

                            let _ = response.send(());
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Scan once: dispatch ready jobs, then sweep for abandoned ones.
    ///
    /// Records that are missing or cannot be decoded are logged and skipped.
    /// A failing job never stops the others from being dispatched.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, DispatcherError> {
        self.cleanup_finished_jobs().await;

        let mut ready = Vec::new();
        for id in self.engine.context().jobs().pending_ids().await? {
            match self.engine.context().jobs().load(&id).await {
                Ok(Some(job)) if job.is_ready(now) => ready.push(job),
                Ok(Some(_)) => {}
                Ok(None) => tracing::warn!(job_id = %id, "pending index entry without record"),
                Err(e) => tracing::warn!(job_id = %id, error = %e, "failed to load pending job"),
            }
        }
        ready.sort_by(|a, b| {
            a.next_run_at()
                .cmp(&b.next_run_at())
                .then_with(|| a.id().cmp(b.id()))
        });

        let mut report = TickReport {
            ready: ready.len(),
            ..TickReport::default()
        };

        let mut in_flight = self.in_flight.write().await;
        for job in ready {
            if in_flight.contains_key(job.id()) {
                report.in_flight += 1;
                continue;
            }
            if in_flight.len() >= self.max_concurrent_jobs {
                report.deferred += 1;
                continue;
            }
            let id = job.id().clone();
            in_flight.insert(id, self.spawn_due(job, now));
            report.dispatched += 1;
        }
        drop(in_flight);

        if report.deferred > 0 {
            tracing::debug!(
                deferred = report.deferred,
                max_concurrent_jobs = self.max_concurrent_jobs,
                "concurrency limit reached"
            );
        }

        report.recovered = self.recover_abandoned().await?;
        Ok(report)
    }

    fn spawn_due(&self, job: Job, now: DateTime<Utc>) -> JoinHandle<()> {
        let engine = self.engine.clone();
        tokio::spawn(async move {
            let holder = engine.context().holder().clone();
            match engine.execute_due(&job, &holder, now).await {
                Ok(ExecutionOutcome::NotAcquired) => {
                    tracing::debug!(job_id = %job.id(), "job taken by another holder");
                }
                Ok(ExecutionOutcome::Skipped(reason)) => {
                    tracing::debug!(job_id = %job.id(), ?reason, "job skipped");
                }
                Ok(_) => {}
                // Already logged with its retry decision
                Err(ExecutionError::Task { .. }) => {}
                Err(e) => tracing::error!(job_id = %job.id(), error = %e, "job execution failed"),
            }
        })
    }

    /// Fail running jobs that no live holder owns.
    ///
    /// Jobs executing on this replica are left alone. For the rest, taking
    /// the lease is the liveness check.
    async fn recover_abandoned(&self) -> Result<usize, StoreError> {
        let running = self.engine.context().jobs().running_ids().await?;
        if running.is_empty() {
            return Ok(0);
        }

        let local: HashSet<JobId> = self.in_flight.read().await.keys().cloned().collect();
        let holder = self.engine.context().holder().clone();

        let mut recovered = 0;
        for id in running.into_iter().filter(|id| !local.contains(id)) {
            match self.engine.recover(&id, &holder).await {
                Ok(ExecutionOutcome::Recovered { .. }) => recovered += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(job_id = %id, error = %e, "failed to recover job"),
            }
        }
        Ok(recovered)
    }

    /// Run a job now and answer `response` when the attempt has finished.
    ///
    /// The execution is spawned so that the loop keeps serving commands.
    async fn trigger_job(
        &self,
        job_id: JobId,
        response: oneshot::Sender<Result<ExecutionOutcome, DispatcherError>>,
    ) {
        let job = match self.engine.context().jobs().load(&job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                let _ = response.send(Err(DispatcherError::JobNotFound(job_id)));
                return;
            }
            Err(e) => {
                let _ = response.send(Err(e.into()));
                return;
            }
        };

        let mut in_flight = self.in_flight.write().await;
        if in_flight
            .get(&job_id)
            .is_some_and(|handle| !handle.is_finished())
        {
            // This replica holds the lease already
            let _ = response.send(Ok(ExecutionOutcome::NotAcquired));
            return;
        }

        tracing::info!(job_id = %job_id, "manual trigger");
        let engine = self.engine.clone();
        let handle = tokio::spawn(async move {
            let holder = engine.context().holder().clone();
            let result = engine
                .execute(&job, &holder)
                .await
                .map_err(DispatcherError::from);
            let _ = response.send(result);
        });
        in_flight.insert(job_id, handle);
    }

    /// Number of executions started by this replica that are still running.
    pub async fn in_flight(&self) -> usize {
        self.cleanup_finished_jobs().await;
        self.in_flight.read().await.len()
    }

    /// Clean up finished job handles.
    async fn cleanup_finished_jobs(&self) {
        let mut in_flight = self.in_flight.write().await;
        in_flight.retain(|_, handle| !handle.is_finished());
    }

    /// Wait for all in-flight executions to complete with a timeout.
    pub async fn await_running_jobs(&self) {
        let running_count = self.in_flight.read().await.len();

        if running_count == 0 {
            tracing::info!("no running jobs to wait for during shutdown");
            return;
        }

        tracing::info!(
            running = running_count,
            timeout = ?self.shutdown_timeout,
            "graceful shutdown: waiting for running jobs"
        );

        let start = tokio::time::Instant::now();
        let deadline = start + self.shutdown_timeout;

        loop {
            let mut in_flight = self.in_flight.write().await;
            in_flight.retain(|_, handle| !handle.is_finished());
            let remaining = in_flight.len();
            drop(in_flight);

            if remaining == 0 {
                tracing::info!(elapsed = ?start.elapsed(), "all running jobs completed");
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                // Leases of abandoned jobs expire and the sweep recovers them
                tracing::warn!(
                    remaining,
                    timeout = ?self.shutdown_timeout,
                    "graceful shutdown timeout exceeded"
                );
                break;
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
