//! Reading reminders out of free-text messages.
//!
//! [`Extractor::extract`] never fails: when the model is unreachable or
//! answers with something unusable, [`fallback_extraction`] keeps the start
//! of the message as the task and looks for a deadline written in words.
//! Without one the inbound pipeline reports back to the user.

pub mod error;
pub mod gemini;
pub mod natural;
pub mod parse;

use async_trait::async_trait;
use chrono::Utc;
use whispr_core::reminder::Extracted;

pub use error::{ExtractError, Result};
pub use gemini::GeminiExtractor;
pub use natural::find_deadline;
pub use parse::{fallback_extraction, parse_deadline, strip_code_fences};

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str) -> Extracted;
}

/// Used when no model is configured.
#[derive(Debug, Default)]
pub struct FallbackExtractor;

#[async_trait]
impl Extractor for FallbackExtractor {
    async fn extract(&self, text: &str) -> Extracted {
        fallback_extraction(text, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Weekday};

    #[tokio::test]
    async fn fallback_extractor_reads_worded_deadline() {
        let extracted = FallbackExtractor.extract("Assignment due Friday 5pm").await;
        assert_eq!(extracted.task, "Assignment due Friday 5pm");
        let deadline = extracted.deadline.unwrap();
        assert_eq!(deadline.weekday(), Weekday::Fri);
        assert!(deadline > Utc::now());
    }
}
