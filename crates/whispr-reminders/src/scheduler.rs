//! Turns a reminder's deadline and the owner's offsets into schedule entries
//! and delay-queue jobs.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument};
use whispr_core::{
    config::{SchedulerConfig, REMINDER_QUEUE},
    reminder::ReminderJob,
    time::now_millis,
    types::ReminderId,
};
use whispr_queue::{Backoff, DelayQueue, Job, JobOptions};

use crate::{
    error::{ReminderError, Result},
    quiet::defer_past_quiet_hours,
    store::ReminderStore,
    types::{Reminder, ScheduleEntry, User},
};

/// Largest accepted reminder offset (ten years). Larger values cannot be
/// subtracted from a deadline without leaving chrono's date range.
pub const MAX_OFFSET_HOURS: u32 = 24 * 366 * 10;

/// Retry policy and options applied to every scheduled delivery.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub enforce_quiet_hours: bool,
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_base_ms: config.backoff_base_ms,
            enforce_quiet_hours: config.enforce_quiet_hours,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

pub struct ReminderScheduler {
    queue: DelayQueue,
    reminders: Arc<ReminderStore>,
    settings: SchedulerSettings,
}

impl ReminderScheduler {
    pub fn new(queue: DelayQueue, reminders: Arc<ReminderStore>, settings: SchedulerSettings) -> Self {
        Self {
            queue,
            reminders,
            settings,
        }
    }

    /// Compute the reminder's fire times from `user.reminder_timing`, persist
    /// them as the schedule and enqueue one delivery job per entry.
    ///
    /// Returns the number of entries scheduled; offsets whose fire time has
    /// already passed are dropped, so 0 is a normal result.
    pub fn schedule_reminder(&self, reminder: &Reminder, user: &User) -> Result<usize> {
        self.schedule_reminder_at(reminder, user, now_millis())
    }

    /// [`Self::schedule_reminder`] relative to an explicit `now`.
    ///
    /// The schedule is written before anything is enqueued, under the
    /// version `reminder` was read at. If enqueueing fails part way the
    /// persisted entries without a job are picked up by the reconciler.
    #[instrument(skip(self, reminder, user, now), fields(reminder_id = %reminder.id))]
    pub fn schedule_reminder_at(
        &self,
        reminder: &Reminder,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let deadline = reminder
            .deadline()
            .ok_or_else(|| ReminderError::MissingDeadline {
                id: reminder.id.to_string(),
            })?;

        let entries = self.plan(deadline, user, now);
        self.reminders
            .replace_schedule(&reminder.id, &entries, reminder.version)?;

        for (index, entry) in entries.iter().enumerate() {
            self.enqueue_entry(&reminder.id, index, entry.scheduled_for, now)?;
        }

        info!(
            entries = entries.len(),
            offsets = ?user.reminder_timing,
            "reminder scheduled"
        );
        Ok(entries.len())
    }

    /// Enqueue the delivery job for one schedule entry.
    ///
    /// Keyed by `reminder:{id}:{index}`, so enqueueing an entry that already
    /// has a job returns that job instead of creating a second one.
    pub fn enqueue_entry(
        &self,
        reminder_id: &ReminderId,
        index: usize,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let payload = ReminderJob::new(reminder_id.clone(), index);
        let opts = JobOptions::delayed(scheduled_for - now)
            .attempts(self.settings.max_attempts)
            .backoff(Backoff::Exponential {
                base_ms: self.settings.backoff_base_ms,
            })
            .key(payload.dedup_key());
        let job = self.queue.enqueue_at(REMINDER_QUEUE, &payload, opts, now)?;
        debug!(reminder_id = %reminder_id, index, job_id = %job.id, "delivery job queued");
        Ok(job)
    }

    /// Fire times for `deadline`, one per offset still in the future, in
    /// offset order. An offset reaching past the representable range counts
    /// as already passed.
    pub fn plan(&self, deadline: DateTime<Utc>, user: &User, now: DateTime<Utc>) -> Vec<ScheduleEntry> {
        user.reminder_timing
            .iter()
            .filter_map(|&hours| {
                let fire_at = Duration::try_hours(i64::from(hours))
                    .and_then(|offset| deadline.checked_sub_signed(offset));
                let Some(fire_at) = fire_at.filter(|t| *t > now) else {
                    debug!(hours, "offset already passed; skipped");
                    return None;
                };
                Some(ScheduleEntry::planned(self.adjust(fire_at, deadline, user)))
            })
            .collect()
    }

    // --- private helpers ---------------------------------------------------

    fn adjust(&self, fire_at: DateTime<Utc>, deadline: DateTime<Utc>, user: &User) -> DateTime<Utc> {
        if !self.settings.enforce_quiet_hours {
            return fire_at;
        }
        let deferred = defer_past_quiet_hours(fire_at, user.quiet_hours, user.tz());
        if deferred < deadline {
            deferred
        } else {
            fire_at
        }
    }
}
