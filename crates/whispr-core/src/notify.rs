use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a notification sender.
///
/// The delivery worker treats every variant as retryable; the distinction
/// only matters for logs.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The request never reached the provider (DNS, TLS, connection reset).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider answered with a non-success status.
    #[error("Provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The provider accepted the request but the response was unusable.
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Send timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Outbound message channel used for reminders and chat replies.
///
/// Implementations must be `Send + Sync`; one instance is shared by the
/// delivery worker pool and the inbound pipeline.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `body` to the contact address `to`.
    ///
    /// Returns the provider's delivery id.
    async fn send(&self, to: &str, body: &str) -> Result<String, NotifyError>;
}
