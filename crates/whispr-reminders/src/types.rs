use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use whispr_core::{
    config::{DEFAULT_REMINDER_TIMING, DEFAULT_TIMEZONE},
    reminder::Extracted,
    types::{ReminderId, UserId},
};

/// Hour-of-day window (0-23, user's local time) in which nothing should be
/// delivered. `start > end` wraps midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: u32,
    pub end: u32,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self { start: 22, end: 7 }
    }
}

/// A person who forwards messages; identified by their contact address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Contact address as received from the channel, e.g. `whatsapp:+234…`.
    pub phone_number: String,
    pub name: Option<String>,
    /// IANA zone name used for rendering and quiet hours.
    pub timezone: String,
    /// Hours-before-deadline offsets, in schedule creation order.
    pub reminder_timing: Vec<u32>,
    pub quiet_hours: QuietHours,
    /// Inactive users keep their reminders but receive nothing.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl User {
    pub fn new(phone_number: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: UserId::new(),
            phone_number: phone_number.to_string(),
            name: None,
            timezone: DEFAULT_TIMEZONE.to_string(),
            reminder_timing: DEFAULT_REMINDER_TIMING.to_vec(),
            quiet_hours: QuietHours::default(),
            is_active: true,
            created_at: now,
            last_active: now,
        }
    }

    /// The user's zone; an unparseable name falls back to UTC.
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    /// Created; nothing delivered yet.
    Pending,
    /// At least one schedule entry has been delivered.
    Sent,
    Completed,
    /// Deleted by the user. Queued jobs still fire but deliver nothing.
    Cancelled,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Sent => "sent",
            ReminderStatus::Completed => "completed",
            ReminderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReminderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReminderStatus::Pending),
            "sent" => Ok(ReminderStatus::Sent),
            "completed" => Ok(ReminderStatus::Completed),
            "cancelled" => Ok(ReminderStatus::Cancelled),
            other => Err(format!("unknown reminder status: {other}")),
        }
    }
}

/// One planned delivery of a reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub scheduled_for: DateTime<Utc>,
    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
}

impl ScheduleEntry {
    pub fn planned(scheduled_for: DateTime<Utc>) -> Self {
        Self {
            scheduled_for,
            sent: false,
            sent_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: ReminderId,
    pub user_id: UserId,
    pub original_message: String,
    pub extracted: Extracted,
    pub status: ReminderStatus,
    /// Index-addressed by queued jobs; never reordered or truncated once
    /// written.
    pub scheduled_reminders: Vec<ScheduleEntry>,
    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.extracted.deadline
    }
}

/// Result of recording a delivery against a schedule entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// Entry flipped to sent and the reminder moved to `sent`.
    Marked,
    /// Entry was already marked by an earlier delivery.
    AlreadySent,
    /// Reminder is cancelled; nothing was changed.
    Cancelled,
    /// The index does not exist in the reminder's schedule.
    MissingEntry,
    MissingReminder,
}

/// An undelivered schedule entry, as seen by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub reminder_id: ReminderId,
    pub index: usize,
    pub scheduled_for: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use whispr_core::time::now_millis;

    #[test]
    fn new_user_has_product_defaults() {
        let user = User::new("whatsapp:+2348000000000", now_millis());
        assert_eq!(user.reminder_timing, vec![24, 1]);
        assert_eq!(user.quiet_hours, QuietHours { start: 22, end: 7 });
        assert_eq!(user.tz(), chrono_tz::Africa::Lagos);
        assert!(user.is_active);
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        let mut user = User::new("+1", now_millis());
        user.timezone = "Mars/Olympus".into();
        assert_eq!(user.tz(), Tz::UTC);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ReminderStatus::Pending,
            ReminderStatus::Sent,
            ReminderStatus::Completed,
            ReminderStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<ReminderStatus>(), Ok(status));
        }
        assert!("done".parse::<ReminderStatus>().is_err());
    }
}
