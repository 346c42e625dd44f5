//! Job executor with retry and backoff logic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobKind, JobResult, JobStatus};

/// Handler for one job kind (or a `prefix.*` category).
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> JobResult;
}

#[async_trait]
impl<H> JobHandler for Arc<H>
where
    H: JobHandler + ?Sized,
{
    async fn handle(&self, job: &Job) -> JobResult {
        (**self).handle(job).await
    }
}

#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// Sleep between claims when the queue is empty
    pub poll_interval: Duration,
    /// Worker tasks claiming jobs concurrently
    pub concurrency: usize,
    /// Name for logging
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            concurrency: 4,
            name: "job-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_dead_lettered: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl JobExecutorHandle {
    /// Stop claiming new jobs and wait for in-flight ones to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "job worker task panicked");
            }
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Outcome of executing one claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    Succeeded,
    Retrying(String),
    DeadLettered(String),
}

/// Background job executor.
///
/// Polls a job store for ready jobs, runs them through registered handlers,
/// and handles retries and dead-lettering.
pub struct JobExecutor<S: JobStore> {
    store: S,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl<S: JobStore + 'static> JobExecutor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for an exact kind (`"fulfillment.ship"`), a category
    /// (`"fulfillment.*"`) or everything (`"*"`).
    pub fn register_handler(&mut self, kind_pattern: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(kind_pattern.into(), handler);
    }

    fn get_handler(&self, kind: JobKind) -> Option<&Arc<dyn JobHandler>> {
        let type_name = kind.type_name();
        if let Some(h) = self.handlers.get(type_name) {
            return Some(h);
        }

        for (pattern, handler) in &self.handlers {
            if let Some(prefix) = pattern.strip_suffix(".*") {
                if type_name.starts_with(prefix) {
                    return Some(handler);
                }
            }
        }

        self.handlers.get("*")
    }

    /// Run one claimed job and persist its outcome.
    pub async fn execute_one(&self, job: &mut Job) -> Result<Execution, JobStoreError> {
        let started = Utc::now();

        let result = match self.get_handler(job.kind) {
            Some(handler) => handler.handle(job).await,
            None => JobResult::Failure(format!("no handler for job kind {}", job.kind.type_name())),
        };

        match result {
            JobResult::Success => {
                job.mark_completed(started);
                self.store.update(job)?;
                debug!(job_id = %job.id, kind = job.kind.type_name(), "job completed");
                Ok(Execution::Succeeded)
            }
            JobResult::Failure(error) => {
                job.mark_dead(error.clone(), started);
                self.store.update(job)?;
                warn!(job_id = %job.id, kind = job.kind.type_name(), error = %error, "job failed permanently");
                self.store.dead_letter(job.clone(), error.clone())?;
                Ok(Execution::DeadLettered(error))
            }
            JobResult::Retry(error) => {
                job.mark_failed(error.clone(), started);
                self.store.update(job)?;
                if matches!(job.status, JobStatus::DeadLettered { .. }) {
                    warn!(
                        job_id = %job.id,
                        kind = job.kind.type_name(),
                        attempts = job.attempt,
                        error = %error,
                        "job exhausted retries"
                    );
                    self.store.dead_letter(job.clone(), error.clone())?;
                    Ok(Execution::DeadLettered(error))
                } else {
                    debug!(job_id = %job.id, attempt = job.attempt, error = %error, "job scheduled for retry");
                    Ok(Execution::Retrying(error))
                }
            }
        }
    }

    /// Claim and execute ready jobs until none is left. Returns the number run.
    ///
    /// Jobs waiting on a backoff are not ready and are left alone.
    pub async fn run_until_idle(&self) -> Result<usize, JobStoreError> {
        let mut processed = 0;
        while let Some(mut job) = self.store.claim_next()? {
            self.execute_one(&mut job).await?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Spawn `config.concurrency` worker tasks on the current tokio runtime.
    pub fn spawn(self, config: JobExecutorConfig) -> JobExecutorHandle
    where
        S: 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));
        let executor = Arc::new(self);
        let started = Instant::now();

        info!(executor = %config.name, concurrency = config.concurrency, "job executor started");

        let workers = (0..config.concurrency.max(1))
            .map(|worker| {
                let executor = executor.clone();
                let config = config.clone();
                let shutdown = shutdown_rx.clone();
                let stats = stats.clone();
                tokio::spawn(async move {
                    worker_loop(executor, config, worker, shutdown, stats, started).await;
                })
            })
            .collect();

        JobExecutorHandle {
            shutdown: shutdown_tx,
            workers,
            stats,
        }
    }
}

async fn worker_loop<S: JobStore + 'static>(
    executor: Arc<JobExecutor<S>>,
    config: JobExecutorConfig,
    worker: usize,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<Mutex<ExecutorStats>>,
    started: Instant,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        if let Ok(mut s) = stats.lock() {
            s.uptime_secs = started.elapsed().as_secs();
        }

        match executor.store.claim_next() {
            Ok(Some(mut job)) => {
                debug!(
                    executor = %config.name,
                    worker,
                    job_id = %job.id,
                    kind = job.kind.type_name(),
                    attempt = job.attempt,
                    "claimed job"
                );
                update_stats(&stats, |s| s.current_running += 1);

                let outcome = executor.execute_one(&mut job).await;

                update_stats(&stats, |s| {
                    s.current_running = s.current_running.saturating_sub(1);
                    s.jobs_processed += 1;
                    match &outcome {
                        Ok(Execution::Succeeded) => s.jobs_succeeded += 1,
                        Ok(Execution::Retrying(_)) => s.jobs_failed += 1,
                        Ok(Execution::DeadLettered(_)) => {
                            s.jobs_failed += 1;
                            s.jobs_dead_lettered += 1;
                        }
                        Err(_) => s.jobs_failed += 1,
                    }
                });

                if let Err(e) = outcome {
                    error!(executor = %config.name, job_id = %job.id, error = %e, "failed to record job outcome");
                }
            }
            Ok(None) => {
                if idle(&config, &mut shutdown).await {
                    break;
                }
            }
            Err(e) => {
                error!(executor = %config.name, error = %e, "failed to claim job");
                if idle(&config, &mut shutdown).await {
                    break;
                }
            }
        }
    }

    debug!(executor = %config.name, worker, "job worker stopped");
}

/// Wait for the next poll. True when the handle is gone and the worker should stop.
async fn idle(config: &JobExecutorConfig, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(config.poll_interval) => false,
        changed = shutdown.changed() => changed.is_err(),
    }
}

fn update_stats(stats: &Mutex<ExecutorStats>, f: impl FnOnce(&mut ExecutorStats)) {
    if let Ok(mut s) = stats.lock() {
        f(&mut s);
    }
}
