//! Quiet-hours deferral.
//!
//! A fire time that falls inside the user's quiet window (evaluated in the
//! user's own timezone) moves to the moment the window ends.

use chrono::{DateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::types::QuietHours;

/// Whether local hour `hour` lies inside `quiet`. An empty window
/// (`start == end`) never matches.
pub fn in_quiet_hours(hour: u32, quiet: QuietHours) -> bool {
    let (start, end) = (quiet.start % 24, quiet.end % 24);
    if start == end {
        return false;
    }
    if start < end {
        (start..end).contains(&hour)
    } else {
        hour >= start || hour < end
    }
}

/// Shift `at` to the end of the quiet window if it falls inside it;
/// otherwise return it unchanged.
pub fn defer_past_quiet_hours(at: DateTime<Utc>, quiet: QuietHours, tz: Tz) -> DateTime<Utc> {
    let local = at.with_timezone(&tz);
    let hour = local.hour();
    if !in_quiet_hours(hour, quiet) {
        return at;
    }

    let end = quiet.end % 24;
    let mut date = local.date_naive();
    if hour >= end {
        // Inside a window that wraps midnight, before midnight.
        date = date.succ_opt().unwrap_or(date);
    }
    let Some(end_time) = NaiveTime::from_hms_opt(end, 0, 0) else {
        return at;
    };
    match tz.from_local_datetime(&date.and_time(end_time)).earliest() {
        Some(resumed) => resumed.with_timezone(&Utc),
        // Window end falls in a DST gap; deliver on time rather than guess.
        None => at,
    }
}
