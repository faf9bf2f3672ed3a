//! Reminder content produced by extraction, and the delay-queue payload
//! shared between the scheduler (producer) and the delivery worker (consumer).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ReminderId;

/// Category of the thing being reminded about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderKind {
    Assignment,
    Exam,
    Class,
    Deadline,
    Event,
    #[default]
    #[serde(other)]
    Other,
}

impl ReminderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderKind::Assignment => "assignment",
            ReminderKind::Exam => "exam",
            ReminderKind::Class => "class",
            ReminderKind::Deadline => "deadline",
            ReminderKind::Event => "event",
            ReminderKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReminderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assignment" => Ok(ReminderKind::Assignment),
            "exam" => Ok(ReminderKind::Exam),
            "class" => Ok(ReminderKind::Class),
            "deadline" => Ok(ReminderKind::Deadline),
            "event" => Ok(ReminderKind::Event),
            "other" => Ok(ReminderKind::Other),
            other => Err(format!("unknown reminder kind: {other}")),
        }
    }
}

/// Structured reading of a forwarded message.
///
/// `deadline` is `None` when nothing date-like was found; such messages
/// never become reminders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extracted {
    pub task: String,
    pub course: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: ReminderKind,
    pub deadline: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

impl Extracted {
    /// A bare task with no deadline or details.
    pub fn task(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            course: None,
            kind: ReminderKind::Other,
            deadline: None,
            location: None,
            notes: None,
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Stored as JSON in the `jobs.payload` column.
///
/// `scheduled_reminder_index` addresses an entry of the reminder's
/// `scheduled_reminders` list, which is never reordered or truncated once
/// written, so the index stays valid for the lifetime of the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderJob {
    pub reminder_id: ReminderId,
    pub scheduled_reminder_index: usize,
}

impl ReminderJob {
    pub fn new(reminder_id: ReminderId, scheduled_reminder_index: usize) -> Self {
        Self {
            reminder_id,
            scheduled_reminder_index,
        }
    }

    /// De-duplication key: at most one queued job per schedule entry.
    pub fn dedup_key(&self) -> String {
        format!(
            "reminder:{}:{}",
            self.reminder_id, self.scheduled_reminder_index
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_reads_as_other() {
        let kind: ReminderKind = serde_json::from_str("\"seminar\"").unwrap();
        assert_eq!(kind, ReminderKind::Other);
        let kind: ReminderKind = serde_json::from_str("\"exam\"").unwrap();
        assert_eq!(kind, ReminderKind::Exam);
    }

    #[test]
    fn extracted_serialises_kind_as_type() {
        let extracted = Extracted::task("Essay");
        let json = serde_json::to_value(&extracted).unwrap();
        assert_eq!(json["type"], "other");
        assert!(json["deadline"].is_null());
    }

    #[test]
    fn payload_uses_camel_case_field_names() {
        let job = ReminderJob::new(ReminderId::from("r-1"), 1);
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["reminderId"], "r-1");
        assert_eq!(json["scheduledReminderIndex"], 1);
    }

    #[test]
    fn dedup_key_is_per_entry() {
        let a = ReminderJob::new(ReminderId::from("r-1"), 0);
        let b = ReminderJob::new(ReminderId::from("r-1"), 1);
        assert_eq!(a.dedup_key(), "reminder:r-1:0");
        assert_ne!(a.dedup_key(), b.dedup_key());
    }
}
