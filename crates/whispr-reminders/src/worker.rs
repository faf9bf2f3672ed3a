//! Delivery of due schedule entries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};
use whispr_core::{reminder::ReminderJob, time::now_millis, Notifier, NotifyError};
use whispr_queue::{Job, JobHandler};

use crate::{
    error::Result,
    message::render_reminder,
    store::ReminderStore,
    types::{MarkOutcome, ReminderStatus},
    users::UserStore,
};

/// What a single job execution ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Notification sent; carries the provider's delivery id.
    Sent { delivery_id: String },
    ReminderMissing,
    ReminderCancelled,
    /// This entry was delivered by an earlier execution.
    AlreadySent,
    UserMissing,
    UserInactive,
}

/// Consumer of the reminder queue lane.
pub struct ReminderWorker {
    reminders: Arc<ReminderStore>,
    users: Arc<UserStore>,
    notifier: Arc<dyn Notifier>,
    send_timeout: Duration,
}

impl ReminderWorker {
    pub fn new(
        reminders: Arc<ReminderStore>,
        users: Arc<UserStore>,
        notifier: Arc<dyn Notifier>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            reminders,
            users,
            notifier,
            send_timeout,
        }
    }

    /// Re-validate the reminder and its owner, send the notification and
    /// mark the entry sent.
    ///
    /// Stale targets resolve to `Ok` with a skip outcome; only a failed or
    /// timed-out send is an error, so the queue retries it.
    pub async fn on_job_due(&self, job: &ReminderJob) -> Result<Delivery> {
        let reminder_id = &job.reminder_id;
        let index = job.scheduled_reminder_index;

        let Some(reminder) = self.reminders.get(reminder_id)? else {
            info!(%reminder_id, index, "reminder no longer exists; skipping delivery");
            return Ok(Delivery::ReminderMissing);
        };
        if reminder.status == ReminderStatus::Cancelled {
            info!(%reminder_id, index, "reminder cancelled; skipping delivery");
            return Ok(Delivery::ReminderCancelled);
        }
        if reminder
            .scheduled_reminders
            .get(index)
            .is_some_and(|entry| entry.sent)
        {
            info!(%reminder_id, index, "entry already delivered; skipping");
            return Ok(Delivery::AlreadySent);
        }

        let Some(user) = self.users.get(&reminder.user_id)? else {
            info!(%reminder_id, user_id = %reminder.user_id, "owner not found; skipping delivery");
            return Ok(Delivery::UserMissing);
        };
        if !user.is_active {
            info!(%reminder_id, user_id = %user.id, "owner inactive; skipping delivery");
            return Ok(Delivery::UserInactive);
        }

        let body = render_reminder(&reminder, &user);
        let delivery_id = self.send(&user.phone_number, &body).await?;

        match self.reminders.mark_entry_sent(reminder_id, index, now_millis())? {
            MarkOutcome::Marked | MarkOutcome::AlreadySent => {}
            MarkOutcome::MissingEntry => {
                warn!(%reminder_id, index, "delivered entry is not in the schedule")
            }
            MarkOutcome::Cancelled => {
                warn!(%reminder_id, index, "reminder cancelled while the notification was in flight")
            }
            MarkOutcome::MissingReminder => {
                warn!(%reminder_id, index, "reminder removed while the notification was in flight")
            }
        }

        info!(%reminder_id, index, %delivery_id, "reminder delivered");
        Ok(Delivery::Sent { delivery_id })
    }

    // --- private helpers ---------------------------------------------------

    async fn send(&self, to: &str, body: &str) -> std::result::Result<String, NotifyError> {
        match tokio::time::timeout(self.send_timeout, self.notifier.send(to, body)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout {
                ms: u64::try_from(self.send_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

#[async_trait]
impl JobHandler for ReminderWorker {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        let payload: ReminderJob = job.payload()?;
        self.on_job_due(&payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use rusqlite::Connection;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use whispr_core::{
        reminder::Extracted,
        types::{ReminderId, UserId},
    };

    use crate::types::{Reminder, ScheduleEntry, User};

    /// Records every send; fails the first `fail_first` calls.
    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, String)>>,
        calls: AtomicUsize,
        fail_first: usize,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn send(&self, to: &str, body: &str) -> std::result::Result<String, NotifyError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if n < self.fail_first {
                return Err(NotifyError::Transport("connection reset".into()));
            }
            self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
            Ok(format!("SM{n}"))
        }
    }

    struct Fixture {
        reminders: Arc<ReminderStore>,
        users: Arc<UserStore>,
        notifier: Arc<Recorder>,
        worker: ReminderWorker,
        user: User,
        reminder: Reminder,
    }

    fn fixture(notifier: Recorder) -> Fixture {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let reminders = Arc::new(ReminderStore::new(conn.clone()).unwrap());
        let users = Arc::new(UserStore::new(conn).unwrap());
        let notifier = Arc::new(notifier);
        let worker = ReminderWorker::new(
            reminders.clone(),
            users.clone(),
            notifier.clone(),
            Duration::from_millis(200),
        );

        let now = now_millis();
        let (user, _) = users.get_or_create("whatsapp:+2348000000000").unwrap();
        let reminder = reminders
            .create(
                &user.id,
                "Essay due in two days",
                Extracted::task("Essay").with_deadline(now + ChronoDuration::hours(48)),
            )
            .unwrap();
        reminders
            .replace_schedule(
                &reminder.id,
                &[
                    ScheduleEntry::planned(now + ChronoDuration::hours(24)),
                    ScheduleEntry::planned(now + ChronoDuration::hours(47)),
                ],
                reminder.version,
            )
            .unwrap();

        Fixture {
            reminders,
            users,
            notifier,
            worker,
            user,
            reminder,
        }
    }

    fn job(f: &Fixture, index: usize) -> ReminderJob {
        ReminderJob::new(f.reminder.id.clone(), index)
    }

    #[tokio::test]
    async fn delivers_and_marks_entry() {
        let f = fixture(Recorder::default());

        let outcome = f.worker.on_job_due(&job(&f, 0)).await.unwrap();
        assert_eq!(outcome, Delivery::Sent { delivery_id: "SM0".into() });

        let sent = f.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, f.user.phone_number);
        assert!(sent[0].1.contains("Essay"));

        let stored = f.reminders.get(&f.reminder.id).unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Sent);
        assert!(stored.scheduled_reminders[0].sent);
        assert!(stored.scheduled_reminders[0].sent_at.is_some());
        assert!(!stored.scheduled_reminders[1].sent);
    }

    #[tokio::test]
    async fn cancelled_reminder_sends_nothing() {
        let f = fixture(Recorder::default());
        f.reminders.cancel(&f.reminder.id).unwrap();

        for index in 0..2 {
            let outcome = f.worker.on_job_due(&job(&f, index)).await.unwrap();
            assert_eq!(outcome, Delivery::ReminderCancelled);
        }
        assert_eq!(f.notifier.calls.load(Ordering::SeqCst), 0);
        let stored = f.reminders.get(&f.reminder.id).unwrap().unwrap();
        assert!(stored.scheduled_reminders.iter().all(|e| !e.sent));
        assert_eq!(stored.status, ReminderStatus::Cancelled);
    }

    #[tokio::test]
    async fn inactive_user_is_skipped() {
        let f = fixture(Recorder::default());
        f.users.set_active(&f.user.id, false).unwrap();

        assert_eq!(
            f.worker.on_job_due(&job(&f, 0)).await.unwrap(),
            Delivery::UserInactive
        );
        assert_eq!(f.notifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reminder_of_unknown_owner_is_skipped() {
        let f = fixture(Recorder::default());
        let now = now_millis();
        let orphan = f
            .reminders
            .create(
                &UserId::new(),
                "Quiz tomorrow",
                Extracted::task("Quiz").with_deadline(now + ChronoDuration::hours(30)),
            )
            .unwrap();
        f.reminders
            .replace_schedule(
                &orphan.id,
                &[ScheduleEntry::planned(now + ChronoDuration::hours(6))],
                orphan.version,
            )
            .unwrap();

        let outcome = f
            .worker
            .on_job_due(&ReminderJob::new(orphan.id.clone(), 0))
            .await
            .unwrap();
        assert_eq!(outcome, Delivery::UserMissing);
        assert_eq!(f.notifier.calls.load(Ordering::SeqCst), 0);
        assert!(!f.reminders.get(&orphan.id).unwrap().unwrap().scheduled_reminders[0].sent);
    }

    #[tokio::test]
    async fn missing_reminder_is_not_an_error() {
        let f = fixture(Recorder::default());
        let ghost = ReminderJob::new(ReminderId::from("gone"), 0);
        assert_eq!(
            f.worker.on_job_due(&ghost).await.unwrap(),
            Delivery::ReminderMissing
        );
    }

    #[tokio::test]
    async fn redelivery_of_a_sent_entry_is_skipped() {
        let f = fixture(Recorder::default());
        f.worker.on_job_due(&job(&f, 0)).await.unwrap();
        assert_eq!(
            f.worker.on_job_due(&job(&f, 0)).await.unwrap(),
            Delivery::AlreadySent
        );
        assert_eq!(f.notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_index_still_delivers() {
        let f = fixture(Recorder::default());
        let outcome = f.worker.on_job_due(&job(&f, 7)).await.unwrap();
        assert!(matches!(outcome, Delivery::Sent { .. }));
        let stored = f.reminders.get(&f.reminder.id).unwrap().unwrap();
        assert_eq!(stored.scheduled_reminders.len(), 2);
        assert_eq!(stored.status, ReminderStatus::Pending);
    }

    #[tokio::test]
    async fn send_failure_propagates_and_leaves_entry_unsent() {
        let f = fixture(Recorder {
            fail_first: 1,
            ..Default::default()
        });
        let err = f.worker.on_job_due(&job(&f, 0)).await.unwrap_err();
        assert!(matches!(err, crate::ReminderError::Notify(NotifyError::Transport(_))));
        assert!(!f.reminders.get(&f.reminder.id).unwrap().unwrap().scheduled_reminders[0].sent);
    }

    #[tokio::test]
    async fn hung_sender_times_out() {
        let f = fixture(Recorder {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let err = f.worker.on_job_due(&job(&f, 0)).await.unwrap_err();
        assert!(matches!(
            err,
            crate::ReminderError::Notify(NotifyError::Timeout { ms: 200 })
        ));
    }
}
