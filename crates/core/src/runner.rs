//! Task runner: status transitions, event emission and retries around a sync
//! run.
//!
//! Runs are dispatched through an mpsc job queue drained by a pool of worker
//! tasks. A run is claimed (moved to `running`) before its job is queued, so a
//! second request for the same task is rejected on the spot. Failed runs are
//! re-submitted after a linear backoff until the retry budget is spent.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::RunnerConfig;
use crate::db::{Database, TaskClaim};
use crate::errors::{CoreError, DatabaseError, RunnerError};
use crate::models::{IntegrationEvent, IntegrationTask, NewEvent};
use crate::sync_engine::{SyncEngine, SyncOutcome, TaskPlan};

// ---------------------------------------------------------------------------
// Jobs & policy
// ---------------------------------------------------------------------------

/// One queued run of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub task_id: String,
    /// 0 for the first attempt, `n` for the n-th retry.
    pub attempt: u32,
}

/// How failed runs are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Retry `n` waits `n * backoff`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_secs(config.retry_backoff_secs),
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff * retry
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

/// What happened to one executed job.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(SyncOutcome),
    Failed {
        error: String,
        /// Delay until the scheduled retry, if one was scheduled.
        retry_in: Option<Duration>,
    },
    /// The task was deleted between claim and execution.
    Vanished,
}

/// Result of one scheduled scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub submitted: usize,
    pub not_due: usize,
    pub conflicts: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Handle to the task runner. Cheap to clone.
#[derive(Clone)]
pub struct TaskRunner {
    inner: Arc<Inner>,
}

struct Inner {
    db: Arc<Database>,
    engine: SyncEngine,
    policy: RetryPolicy,
    queue: mpsc::Sender<Job>,
    receiver: Mutex<mpsc::Receiver<Job>>,
    stop: watch::Sender<bool>,
    event_feed: Option<broadcast::Sender<String>>,
}

impl TaskRunner {
    pub fn new(
        db: Arc<Database>,
        engine: SyncEngine,
        policy: RetryPolicy,
        queue_capacity: usize,
    ) -> Self {
        Self::build(db, engine, policy, queue_capacity, None)
    }

    /// Like [`new`](Self::new), additionally publishing every stored event
    /// as JSON on `feed`.
    pub fn with_event_feed(
        db: Arc<Database>,
        engine: SyncEngine,
        policy: RetryPolicy,
        queue_capacity: usize,
        feed: broadcast::Sender<String>,
    ) -> Self {
        Self::build(db, engine, policy, queue_capacity, Some(feed))
    }

    fn build(
        db: Arc<Database>,
        engine: SyncEngine,
        policy: RetryPolicy,
        queue_capacity: usize,
        event_feed: Option<broadcast::Sender<String>>,
    ) -> Self {
        let (queue, receiver) = mpsc::channel(queue_capacity.max(1));
        let (stop, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                db,
                engine,
                policy,
                queue,
                receiver: Mutex::new(receiver),
                stop,
                event_feed,
            }),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.inner.db
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.inner.engine
    }

    pub fn policy(&self) -> RetryPolicy {
        self.inner.policy
    }

    /// Start `count` workers draining the job queue.
    pub fn spawn_workers(&self, count: usize) -> Vec<JoinHandle<()>> {
        info!(workers = count, "starting task workers");
        (0..count)
            .map(|worker| {
                let runner = self.clone();
                let stop = self.inner.stop.subscribe();
                tokio::spawn(async move { runner.worker_loop(worker, stop).await })
            })
            .collect()
    }

    /// Ask workers and pending retries to stop. Runs in progress finish.
    pub fn shutdown(&self) {
        info!("task runner shutting down");
        self.inner.stop.send_replace(true);
    }

    async fn worker_loop(self, worker: usize, mut stop: watch::Receiver<bool>) {
        debug!(worker, "worker started");
        loop {
            if *stop.borrow() {
                break;
            }
            let job = {
                let mut rx = self.inner.receiver.lock().await;
                tokio::select! {
                    job = rx.recv() => job,
                    _ = stop.changed() => None,
                }
            };
            let Some(job) = job else { break };
            self.execute(job).await;
        }
        debug!(worker, "worker stopped");
    }

    // -- submission ---------------------------------------------------------

    /// Claim a task and queue its run.
    ///
    /// Fails with [`RunnerError::ConcurrentRunConflict`] if the task is
    /// already running; nothing is recorded in that case.
    pub async fn submit(&self, task_id: &str) -> Result<IntegrationTask, RunnerError> {
        let task = self.claim(task_id)?;
        self.enqueue(Job {
            task_id: task.id.clone(),
            attempt: 0,
        })
        .await?;
        info!(task_id = %task.id, task = %task.name, "task run queued");
        Ok(task)
    }

    /// Claim a task and execute it on the calling task, bypassing the queue.
    pub async fn run_now(&self, task_id: &str) -> Result<RunOutcome, RunnerError> {
        let task = self.claim(task_id)?;
        Ok(self
            .execute(Job {
                task_id: task.id,
                attempt: 0,
            })
            .await)
    }

    /// Submit every scheduled task that is due. Never waits for runs.
    pub async fn run_scheduled(&self) -> Result<ScanReport, RunnerError> {
        let candidates = self.inner.db.list_schedulable_tasks()?;
        let now = Utc::now();
        let mut report = ScanReport::default();

        for task in candidates {
            if !task.is_due(now) {
                report.not_due += 1;
                continue;
            }
            match self.submit(&task.id).await {
                Ok(_) => report.submitted += 1,
                Err(RunnerError::ConcurrentRunConflict { .. }) => {
                    info!(task_id = %task.id, "scheduled task already running, skipping");
                    report.conflicts += 1;
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "failed to submit scheduled task");
                    report.failed += 1;
                }
            }
        }

        debug!(?report, "scheduled scan finished");
        Ok(report)
    }

    fn claim(&self, task_id: &str) -> Result<IntegrationTask, RunnerError> {
        match self.inner.db.claim_task(task_id)? {
            TaskClaim::Claimed(task) => Ok(task),
            TaskClaim::AlreadyRunning => Err(RunnerError::ConcurrentRunConflict {
                task_id: task_id.to_string(),
            }),
        }
    }

    async fn enqueue(&self, job: Job) -> Result<(), RunnerError> {
        if let Err(mpsc::error::SendError(job)) = self.inner.queue.send(job).await {
            // Release the claim so the task is not stuck in `running`.
            if let Err(e) = self.inner.db.fail_task(&job.task_id) {
                error!(task_id = %job.task_id, error = %e, "failed to release task claim");
            }
            return Err(RunnerError::QueueClosed);
        }
        Ok(())
    }

    // -- execution ----------------------------------------------------------

    /// Execute a claimed job: events, sync, status, and retry scheduling.
    pub async fn execute(&self, job: Job) -> RunOutcome {
        let db = &self.inner.db;
        let task = match db.get_task(&job.task_id) {
            Ok(task) => task,
            Err(DatabaseError::NotFound { .. }) => {
                warn!(task_id = %job.task_id, "task deleted before it could run");
                return RunOutcome::Vanished;
            }
            Err(e) => {
                error!(task_id = %job.task_id, error = %e, "failed to load task");
                return self.fail(&job, CoreError::from(e));
            }
        };

        info!(task_id = %task.id, task = %task.name, attempt = job.attempt, "running integration task");
        self.record_event(NewEvent::sync_start(&task.id, job.attempt));

        let started = Instant::now();
        let result = match TaskPlan::load(db, task) {
            Ok(plan) => self
                .inner
                .engine
                .run(&plan)
                .await
                .map_err(CoreError::from),
            Err(e) => Err(CoreError::from(e)),
        };

        match result {
            Ok(outcome) => {
                let duration = started.elapsed().as_secs_f64();
                self.record_event(NewEvent::sync_complete(
                    &job.task_id,
                    outcome.records_synced,
                    duration,
                ));
                if let Err(e) = db.complete_task(&job.task_id) {
                    error!(task_id = %job.task_id, error = %e, "failed to mark task completed");
                }
                info!(
                    task_id = %job.task_id,
                    records_synced = outcome.records_synced,
                    duration_secs = duration,
                    "integration task completed"
                );
                RunOutcome::Completed(outcome)
            }
            Err(e) => self.fail(&job, e),
        }
    }

    fn fail(&self, job: &Job, err: CoreError) -> RunOutcome {
        let policy = self.inner.policy;
        let message = format!("sync failed: {}", err);
        let details = json!({
            "kind": failure_kind(&err),
            "error": err.to_string(),
            "attempt": job.attempt,
            "max_retries": policy.max_retries,
        });
        self.record_event(NewEvent::error(&job.task_id, message.clone(), details));
        if let Err(e) = self.inner.db.fail_task(&job.task_id) {
            error!(task_id = %job.task_id, error = %e, "failed to mark task failed");
        }

        if job.attempt >= policy.max_retries {
            error!(
                task_id = %job.task_id,
                attempts = job.attempt + 1,
                error = %err,
                "integration task failed, retries exhausted"
            );
            return RunOutcome::Failed {
                error: message,
                retry_in: None,
            };
        }

        let retry = Job {
            task_id: job.task_id.clone(),
            attempt: job.attempt + 1,
        };
        let delay = policy.delay_for(retry.attempt);
        warn!(
            task_id = %job.task_id,
            error = %err,
            retry = retry.attempt,
            delay_secs = delay.as_secs(),
            "integration task failed, retry scheduled"
        );
        self.schedule_retry(retry, delay);
        RunOutcome::Failed {
            error: message,
            retry_in: Some(delay),
        }
    }

    fn schedule_retry(&self, job: Job, delay: Duration) {
        let runner = self.clone();
        let mut stop = self.inner.stop.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.changed() => {
                    info!(task_id = %job.task_id, retry = job.attempt, "dropping pending retry on shutdown");
                    return;
                }
            }
            let task = match runner.claim(&job.task_id) {
                Ok(task) => task,
                Err(RunnerError::ConcurrentRunConflict { .. }) => {
                    info!(task_id = %job.task_id, "task already running, retry skipped");
                    return;
                }
                Err(e) => {
                    warn!(task_id = %job.task_id, error = %e, "retry could not claim task");
                    return;
                }
            };
            debug!(task_id = %task.id, retry = job.attempt, "re-submitting task");
            if let Err(e) = runner.enqueue(job).await {
                warn!(task_id = %task.id, error = %e, "retry could not be queued");
            }
        });
    }

    /// Persist an event and publish it on the live feed.
    fn record_event(&self, event: NewEvent) -> Option<IntegrationEvent> {
        match self.inner.db.insert_event(&event) {
            Ok(stored) => {
                if let Some(feed) = &self.inner.event_feed {
                    let msg = json!({ "type": "integration_event", "event": stored });
                    // No subscribers is fine.
                    let _ = feed.send(msg.to_string());
                }
                Some(stored)
            }
            Err(e) => {
                error!(task_id = %event.task_id, event_type = %event.event_type, error = %e, "failed to record event");
                None
            }
        }
    }
}

fn failure_kind(err: &CoreError) -> &'static str {
    match err {
        CoreError::Sync(e) => e.kind(),
        CoreError::Database(_) => "database_error",
        CoreError::Connector(_) => "connection_error",
        CoreError::Mapping(_) => "mapping_error",
        CoreError::Config(_) => "config_error",
        CoreError::Runner(_) => "runner_error",
        CoreError::InvalidInput { .. } => "invalid_input",
    }
}
