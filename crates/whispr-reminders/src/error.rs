use thiserror::Error;
use whispr_core::NotifyError;
use whispr_queue::QueueError;

/// Errors raised by the reminder stores, scheduler and reconciler.
#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Delivery through the notification sender failed or timed out.
    #[error("Notification failed: {0}")]
    Notify(#[from] NotifyError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Reminder not found: {id}")]
    NotFound { id: String },

    #[error("User not found: {id}")]
    UserNotFound { id: String },

    /// The reminder was modified between read and write.
    #[error("Reminder {id} changed concurrently (expected version {expected})")]
    VersionConflict { id: String, expected: i64 },

    /// Scheduling needs an absolute deadline.
    #[error("Reminder {id} has no deadline")]
    MissingDeadline { id: String },

    #[error("Reminder offset of {0}h is out of range")]
    InvalidOffset(u32),

    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("Store connection lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, ReminderError>;
