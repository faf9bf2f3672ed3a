pub mod config;
pub mod error;
pub mod notify;
pub mod reminder;
pub mod time;
pub mod types;

pub use error::{Result, WhisprError};
pub use notify::{Notifier, NotifyError};
