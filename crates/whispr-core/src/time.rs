//! Timestamp encoding for SQLite TEXT columns.
//!
//! Every stored instant uses the same fixed-width form
//! (`2026-01-05T09:30:00.000Z`) so that plain string comparison in SQL
//! (`run_at <= ?1`, `deadline >= ?1`) orders instants correctly.

use chrono::{DateTime, SecondsFormat, Utc};

pub fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

/// Current instant truncated to whole milliseconds, i.e. exactly what a
/// stored timestamp round-trips to.
pub fn now_millis() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

pub fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}
