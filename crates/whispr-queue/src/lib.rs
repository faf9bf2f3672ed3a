//! `whispr-queue`: durable delay queue with SQLite persistence.
//!
//! # Overview
//!
//! Producers call [`DelayQueue::enqueue`] with a JSON-serialisable payload
//! and [`JobOptions`] (delay, attempt budget, backoff, de-duplication key).
//! Jobs live in the `delay_jobs` table and survive restarts.
//!
//! A [`QueueEngine`] polls one queue lane, claims due jobs and hands each to
//! a [`JobHandler`] on a bounded pool of tokio tasks. A handler error counts
//! as a failed attempt and the job is re-scheduled according to its backoff:
//!
//! | Backoff       | Delay before retry *n* (n = failed attempts) |
//! |---------------|----------------------------------------------|
//! | `Fixed`       | `delay_ms`                                   |
//! | `Exponential` | `base_ms * 2^(n-1)`                          |
//!
//! Once the attempt budget is spent the job is left in `failed` with the
//! last error recorded.

pub mod backoff;
pub mod db;
pub mod engine;
pub mod error;
pub mod queue;
pub mod types;

pub use engine::{EngineConfig, JobHandler, QueueEngine};
pub use error::{QueueError, Result};
pub use queue::DelayQueue;
pub use types::{Backoff, Job, JobOptions, JobStatus, QueueCounts};
