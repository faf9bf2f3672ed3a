//! Inbound message pipeline: commands, extraction and reminder creation.
//!
//! Runs off the webhook's request path. Every outcome, including failure,
//! is reported to the sender as a chat reply.

pub mod command;
pub mod replies;

use std::sync::Arc;

use tracing::{error, info, instrument, warn};
use whispr_core::Notifier;
use whispr_extract::Extractor;
use whispr_reminders::{
    Reminder, ReminderError, ReminderScheduler, ReminderStore, User, UserStore,
};

use self::command::Command;

pub struct Pipeline {
    users: Arc<UserStore>,
    reminders: Arc<ReminderStore>,
    scheduler: Arc<ReminderScheduler>,
    extractor: Arc<dyn Extractor>,
    notifier: Arc<dyn Notifier>,
}

impl Pipeline {
    pub fn new(
        users: Arc<UserStore>,
        reminders: Arc<ReminderStore>,
        scheduler: Arc<ReminderScheduler>,
        extractor: Arc<dyn Extractor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            users,
            reminders,
            scheduler,
            extractor,
            notifier,
        }
    }

    /// Handle one message from `from`. Never fails: errors are logged and
    /// answered with a generic apology.
    #[instrument(skip(self, body), fields(from = %from))]
    pub async fn handle_message(&self, from: &str, body: &str) {
        if let Err(e) = self.process(from, body).await {
            error!(error = %e, "message processing failed");
            self.reply(from, replies::FAILED).await;
        }
    }

    async fn process(&self, from: &str, body: &str) -> anyhow::Result<()> {
        let (user, created) = self.users.get_or_create(from)?;
        if created {
            info!(user_id = %user.id, "new user");
            self.reply(from, replies::WELCOME).await;
            return Ok(());
        }
        self.users.touch(&user.id)?;

        match Command::parse(body) {
            Command::Help => self.reply(from, replies::HELP).await,
            Command::List => {
                let active = self.reminders.find_active_for_user(&user.id, chrono::Utc::now())?;
                self.reply(from, &replies::reminder_list(&active, &user)).await;
            }
            Command::Delete(id) => self.delete(&user, &id).await,
            Command::Forwarded => self.create_reminder(&user, body).await?,
        }
        Ok(())
    }

    async fn delete(&self, user: &User, id: &str) {
        let text = match self.reminders.cancel_for_user(&user.id, id) {
            Ok(Some(reminder)) => {
                info!(reminder_id = %reminder.id, "reminder cancelled by user");
                replies::DELETED
            }
            Ok(None) => replies::NOT_FOUND,
            Err(e) => {
                error!(error = %e, "cancel failed");
                replies::DELETE_FAILED
            }
        };
        self.reply(&user.phone_number, text).await;
    }

    async fn create_reminder(&self, user: &User, body: &str) -> anyhow::Result<()> {
        self.reply(&user.phone_number, replies::PROCESSING).await;

        let extracted = self.extractor.extract(body).await;
        if extracted.deadline.is_none() {
            self.reply(&user.phone_number, replies::NO_DEADLINE).await;
            return Ok(());
        }

        let reminder = self.reminders.create(&user.id, body, extracted)?;
        let reminder = self.schedule(reminder, user)?;

        self.reply(&user.phone_number, &replies::reminder_created(&reminder, user))
            .await;
        Ok(())
    }

    /// Schedule a freshly created reminder. A reconciler sweep may get there
    /// first; its schedule is kept and the stored reminder returned.
    fn schedule(&self, reminder: Reminder, user: &User) -> anyhow::Result<Reminder> {
        match self.scheduler.schedule_reminder(&reminder, user) {
            Ok(entries) => {
                info!(reminder_id = %reminder.id, entries, "reminder created");
                Ok(reminder)
            }
            Err(ReminderError::VersionConflict { .. }) => {
                info!(reminder_id = %reminder.id, "reminder already scheduled by reconciliation");
                Ok(self.reminders.get(&reminder.id)?.unwrap_or(reminder))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replies are best effort; a failed reply is only logged.
    async fn reply(&self, to: &str, text: &str) {
        if let Err(e) = self.notifier.send(to, text).await {
            warn!(to = %to, error = %e, "reply failed");
        }
    }
}
