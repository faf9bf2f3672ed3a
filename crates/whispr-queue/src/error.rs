use thiserror::Error;

/// Errors that can occur within the delay-queue subsystem.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A job payload could not be encoded or decoded.
    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// A previous holder of the connection panicked.
    #[error("Queue connection lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, QueueError>;
