use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::Result;

/// How long to wait before re-attempting a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },
    /// `base_ms`, then `2 * base_ms`, `4 * base_ms`, …
    Exponential { base_ms: u64 },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed { delay_ms: 0 }
    }
}

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `run_at` (or for a retry).
    Pending,
    /// Claimed by the engine; a handler is executing it.
    Running,
    /// Handler returned success.
    Completed,
    /// Attempt budget exhausted; the job is abandoned.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Per-job options given at enqueue time.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Time from now until the job becomes eligible. Negative delays are
    /// treated as zero.
    pub delay: Duration,
    /// Total number of executions allowed, including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// De-duplication key; a second enqueue with the same key is a no-op.
    pub key: Option<String>,
}

impl JobOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// UUID v7 string, primary key.
    pub id: String,
    /// Queue lane this job belongs to; an engine only serves its own lane.
    pub queue: String,
    pub key: Option<String>,
    /// JSON payload forwarded to the job handler.
    pub payload: String,
    pub status: JobStatus,
    /// Earliest instant at which the job may run.
    pub run_at: DateTime<Utc>,
    /// Executions started so far (incremented when the engine claims the job).
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Error text of the most recent failed attempt.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Decode the JSON payload into the producer's type.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    pub fn attempts_left(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }
}

/// Per-status job counts for one queue lane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}
