//! Periodic audit that re-drives scheduling for reminders the normal path
//! missed (crash between creation and scheduling, lost enqueue).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{sync::watch, time::Instant};
use tracing::{debug, error, info, warn};
use whispr_core::{config::REMINDER_QUEUE, reminder::ReminderJob, time::now_millis};
use whispr_queue::{DelayQueue, JobStatus};

use crate::{
    error::{ReminderError, Result},
    scheduler::ReminderScheduler,
    store::ReminderStore,
    types::{PendingEntry, Reminder},
    users::UserStore,
};

/// Shortest accepted sweep period.
pub const MIN_RECONCILE_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Unscheduled reminders handed to the scheduler.
    pub scheduled: usize,
    /// Schedule entries those reminders produced.
    pub entries_scheduled: usize,
    /// Persisted entries that had no queue job and were re-enqueued.
    pub repaired: usize,
    /// Reminders or entries that could not be handled this sweep.
    pub failed: usize,
}

pub struct Reconciler {
    reminders: Arc<ReminderStore>,
    users: Arc<UserStore>,
    scheduler: Arc<ReminderScheduler>,
    queue: DelayQueue,
    interval: Duration,
    /// Finished queue jobs older than this are purged after each sweep.
    retain_finished: Option<chrono::Duration>,
}

impl Reconciler {
    pub fn new(
        reminders: Arc<ReminderStore>,
        users: Arc<UserStore>,
        scheduler: Arc<ReminderScheduler>,
        queue: DelayQueue,
        interval: Duration,
    ) -> Self {
        Self {
            reminders,
            users,
            scheduler,
            queue,
            interval: interval.max(MIN_RECONCILE_INTERVAL),
            retain_finished: None,
        }
    }

    pub fn with_retention(mut self, retain_finished: Option<chrono::Duration>) -> Self {
        self.retain_finished = retain_finished;
        self
    }

    /// Sweep every `interval` until `shutdown` broadcasts `true`. The first
    /// sweep happens one interval after start.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "reconciler started");
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep() {
                        Ok(report) => info!(
                            scheduled = report.scheduled,
                            entries = report.entries_scheduled,
                            repaired = report.repaired,
                            failed = report.failed,
                            "reconciliation sweep finished"
                        ),
                        Err(e) => error!("reconciliation sweep error: {e}"),
                    }
                    self.purge();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(now_millis())
    }

    /// One reconciliation pass relative to `now`.
    ///
    /// Errors on individual reminders are logged and counted; only a failing
    /// store query aborts the sweep.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for reminder in self.reminders.find_unscheduled(now)? {
            match self.reschedule(&reminder, now) {
                Ok(entries) => {
                    report.scheduled += 1;
                    report.entries_scheduled += entries;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(reminder_id = %reminder.id, "could not schedule reminder: {e}");
                }
            }
        }

        for entry in self.reminders.find_unsent_entries(now)? {
            match self.repair(&entry, now) {
                Ok(true) => report.repaired += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        reminder_id = %entry.reminder_id,
                        index = entry.index,
                        "could not re-enqueue schedule entry: {e}"
                    );
                }
            }
        }

        Ok(report)
    }

    // --- private helpers ---------------------------------------------------

    fn reschedule(&self, reminder: &Reminder, now: DateTime<Utc>) -> Result<usize> {
        let user = self
            .users
            .get(&reminder.user_id)?
            .ok_or_else(|| ReminderError::UserNotFound {
                id: reminder.user_id.to_string(),
            })?;
        let entries = self.scheduler.schedule_reminder_at(reminder, &user, now)?;
        debug!(reminder_id = %reminder.id, entries, "unscheduled reminder picked up");
        Ok(entries)
    }

    /// Re-enqueue an entry whose job is missing. Returns whether anything
    /// was enqueued.
    fn repair(&self, entry: &PendingEntry, now: DateTime<Utc>) -> Result<bool> {
        let key = ReminderJob::new(entry.reminder_id.clone(), entry.index).dedup_key();
        match self.queue.find_by_key(&key)? {
            None => {
                let job = self.scheduler.enqueue_entry(
                    &entry.reminder_id,
                    entry.index,
                    entry.scheduled_for,
                    now,
                )?;
                info!(
                    reminder_id = %entry.reminder_id,
                    index = entry.index,
                    job_id = %job.id,
                    "orphaned schedule entry re-enqueued"
                );
                Ok(true)
            }
            Some(job) if job.status == JobStatus::Failed => {
                debug!(
                    reminder_id = %entry.reminder_id,
                    index = entry.index,
                    last_error = job.last_error.as_deref().unwrap_or_default(),
                    "delivery abandoned after retries; not re-driven"
                );
                Ok(false)
            }
            Some(_) => Ok(false),
        }
    }

    fn purge(&self) {
        let Some(retain) = self.retain_finished else {
            return;
        };
        if let Err(e) = self.queue.purge_finished(now_millis() - retain) {
            error!(queue = REMINDER_QUEUE, "purging finished jobs failed: {e}");
        }
    }
}
