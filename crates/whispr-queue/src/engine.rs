use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::{sync::Semaphore, sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};
use whispr_core::time::now_millis;

use crate::{
    error::Result,
    queue::DelayQueue,
    types::{Job, JobStatus},
};

/// Consumer callback invoked for every due job.
///
/// Returning `Err` counts as a failed attempt: the engine re-schedules the
/// job according to its backoff until the attempt budget is spent.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &Job) -> anyhow::Result<()>;
}

/// Shortest accepted polling period; `tokio::time::interval` rejects zero.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub poll_interval: Duration,
    /// Maximum number of handlers executing at once.
    pub concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            concurrency: 8,
        }
    }
}

/// Drives one queue lane: polls for due jobs and runs the handler on a
/// bounded pool of tokio tasks.
pub struct QueueEngine {
    queue: DelayQueue,
    lane: String,
    handler: Arc<dyn JobHandler>,
    config: EngineConfig,
    permits: Arc<Semaphore>,
}

impl QueueEngine {
    pub fn new(
        queue: DelayQueue,
        lane: &str,
        handler: Arc<dyn JobHandler>,
        mut config: EngineConfig,
    ) -> Self {
        config.poll_interval = config.poll_interval.max(MIN_POLL_INTERVAL);
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            queue,
            lane: lane.to_string(),
            handler,
            config,
            permits,
        }
    }

    /// Main event loop. Polls every `poll_interval` until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(queue = %self.lane, concurrency = self.config.concurrency, "queue engine started");
        self.recover_on_startup();

        let mut interval = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.dispatch_due(now_millis(), None) {
                        error!(queue = %self.lane, "queue tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(queue = %self.lane, "queue engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Claim every job due at `now`, run the handlers and wait for all of
    /// them. Failures are re-scheduled relative to `now`.
    ///
    /// Returns the number of jobs executed.
    pub async fn process_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let handles = self.dispatch_due(now, Some(now))?;
        let n = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(queue = %self.lane, "job task panicked: {e}");
            }
        }
        Ok(n)
    }

    // --- private helpers ---------------------------------------------------

    /// Jobs still `running` belong to a process that died mid-execution.
    fn recover_on_startup(&self) {
        match self.queue.recover_stale(&self.lane, now_millis()) {
            Ok(n) if n > 0 => warn!(queue = %self.lane, count = n, "interrupted jobs re-queued on startup"),
            Err(e) => error!(queue = %self.lane, "stale job recovery failed: {e}"),
            _ => {}
        }
    }

    /// Claim as many due jobs as there are free worker slots and spawn them.
    ///
    /// `failed_at` pins the instant used for retry scheduling; `None` uses
    /// the wall clock at failure time.
    fn dispatch_due(
        &self,
        now: DateTime<Utc>,
        failed_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<JoinHandle<()>>> {
        let mut permits = Vec::new();
        while let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() {
            permits.push(permit);
        }
        if permits.is_empty() {
            debug!(queue = %self.lane, "all workers busy; skipping tick");
            return Ok(Vec::new());
        }

        let jobs = self.queue.claim_due(&self.lane, now, permits.len())?;
        // Release the slots nothing was claimed for.
        permits.truncate(jobs.len());

        let mut handles = Vec::with_capacity(jobs.len());
        for (job, permit) in jobs.into_iter().zip(permits) {
            let queue = self.queue.clone();
            let handler = Arc::clone(&self.handler);
            handles.push(tokio::spawn(async move {
                execute(queue, handler, job, failed_at).await;
                drop(permit);
            }));
        }
        Ok(handles)
    }
}

/// Run one attempt of `job` and record the outcome.
async fn execute(
    queue: DelayQueue,
    handler: Arc<dyn JobHandler>,
    job: Job,
    failed_at: Option<DateTime<Utc>>,
) {
    debug!(job_id = %job.id, attempt = job.attempts, "executing job");

    match handler.handle(&job).await {
        Ok(()) => {
            if let Err(e) = queue.complete(&job.id, failed_at.unwrap_or_else(now_millis)) {
                error!(job_id = %job.id, "could not mark job completed: {e}");
            }
        }
        Err(err) => {
            let reason = format!("{err:#}");
            match queue.fail(&job, &reason, failed_at.unwrap_or_else(now_millis)) {
                Ok(JobStatus::Failed) => error!(
                    job_id = %job.id,
                    attempt = job.attempts,
                    error = %reason,
                    "job failed; attempts exhausted, abandoning"
                ),
                Ok(_) => warn!(
                    job_id = %job.id,
                    attempt = job.attempts,
                    attempts_left = job.attempts_left(),
                    error = %reason,
                    "job failed; retry scheduled"
                ),
                Err(e) => error!(job_id = %job.id, "could not record job failure: {e}"),
            }
        }
    }
}
