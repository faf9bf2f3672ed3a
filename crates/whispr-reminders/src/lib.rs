//! `whispr-reminders`: reminder state and the scheduling/delivery core.
//!
//! # Overview
//!
//! - [`ReminderScheduler`] turns a reminder's deadline and the owner's
//!   hour offsets into schedule entries, persists them, and enqueues one
//!   delay-queue job per entry.
//! - [`ReminderWorker`] is the [`whispr_queue::JobHandler`] for the
//!   reminder lane. It re-checks the reminder and owner, sends through a
//!   [`whispr_core::Notifier`] and marks the entry sent.
//! - [`Reconciler`] sweeps on a fixed interval for reminders that never got
//!   a schedule and for persisted entries whose job went missing.
//!
//! Cancellation is lazy: queued jobs of a cancelled reminder still fire but
//! deliver nothing.

pub mod db;
pub mod error;
pub mod message;
pub mod quiet;
pub mod reconciler;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod users;
pub mod worker;

pub use error::{ReminderError, Result};
pub use reconciler::{Reconciler, SweepReport};
pub use scheduler::{ReminderScheduler, SchedulerSettings};
pub use store::ReminderStore;
pub use types::{MarkOutcome, QuietHours, Reminder, ReminderStatus, ScheduleEntry, User};
pub use users::UserStore;
pub use worker::{Delivery, ReminderWorker};
