//! Text of the reminder notification.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::types::{Reminder, User};

/// Render `at` in the user's zone, e.g. `3/10/2026, 11:30:00 PM`.
pub fn format_local(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz)
        .format("%-m/%-d/%Y, %-I:%M:%S %p")
        .to_string()
}

/// Body of the WhatsApp message delivered when a schedule entry fires.
pub fn render_reminder(reminder: &Reminder, user: &User) -> String {
    let extracted = &reminder.extracted;
    let mut body = format!("⏰ Reminder!\n\n📝 {}\n", extracted.task);
    if let Some(course) = extracted.course.as_deref().filter(|c| !c.is_empty()) {
        body.push_str(&format!("📚 {course}\n"));
    }
    if let Some(deadline) = extracted.deadline {
        body.push_str(&format!("📅 Due: {}\n", format_local(deadline, user.tz())));
    }
    if let Some(location) = extracted.location.as_deref().filter(|l| !l.is_empty()) {
        body.push_str(&format!("📍 {location}\n"));
    }
    if let Some(notes) = extracted.notes.as_deref().filter(|n| !n.is_empty()) {
        body.push('\n');
        body.push_str(notes);
    }
    body.trim_end().to_string()
}
