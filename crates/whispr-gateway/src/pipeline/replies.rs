//! Texts sent back to the user.

use whispr_reminders::{message::format_local, Reminder, User};

pub const WELCOME: &str = "👋 Welcome to Whispr!\n\n\
    Forward me your academic messages and I'll remind you before deadlines.\n\n\
    Commands:\n/list - View reminders\n/help - Get help";

pub const HELP: &str = "🔔 Whispr Help\n\n\
    Just forward me messages with deadlines and I'll remind you!\n\n\
    Commands:\n\
    /list - View active reminders\n\
    /delete [id] - Remove a reminder\n\
    /help - Show this message\n\n\
    Examples:\n\
    \"Assignment 2 due Friday 11:59pm\"\n\
    \"Math exam next Monday 9am\"";

pub const NO_REMINDERS: &str = "📭 No active reminders.\n\nForward me messages to create reminders!";
pub const NOT_FOUND: &str = "❌ Reminder not found. Use /list to see IDs.";
pub const DELETED: &str = "✅ Reminder deleted!";
pub const DELETE_FAILED: &str = "❌ Error deleting reminder.";
pub const PROCESSING: &str = "⏳ Processing your message...";
pub const NO_DEADLINE: &str = "❌ I couldn't find a deadline in your message.\n\n\
    Try including a date like:\n\
    - \"Due tomorrow\"\n\
    - \"Submit by Dec 30\"\n\
    - \"Exam next Monday\"";
pub const FAILED: &str = "❌ Something went wrong processing your message. Please try again.";

/// `/list` reply: numbered tasks with their due date and short id.
pub fn reminder_list(reminders: &[Reminder], user: &User) -> String {
    if reminders.is_empty() {
        return NO_REMINDERS.to_string();
    }

    let tz = user.tz();
    let mut text = format!("📋 Your Reminders ({})\n\n", reminders.len());
    for (i, reminder) in reminders.iter().enumerate() {
        let due = reminder
            .deadline()
            .map(|d| d.with_timezone(&tz).format("%-m/%-d/%Y").to_string())
            .unwrap_or_else(|| "no date".to_string());
        text.push_str(&format!(
            "{}. {}\n   ⏰ {}\n   ID: {}\n\n",
            i + 1,
            reminder.extracted.task,
            due,
            reminder.id.short()
        ));
    }
    text.push_str("Use /delete [id] to remove");
    text
}

/// Confirmation after a reminder was created and scheduled.
pub fn reminder_created(reminder: &Reminder, user: &User) -> String {
    let extracted = &reminder.extracted;
    let mut text = format!("✅ Reminder created!\n\n📝 {}\n", extracted.task);
    if let Some(course) = extracted.course.as_deref() {
        text.push_str(&format!("📚 {course}\n"));
    }
    if let Some(deadline) = extracted.deadline {
        text.push_str(&format!("⏰ {}\n", format_local(deadline, user.tz())));
    }
    text.push_str(&format!(
        "🔔 Type: {}\n\nID: {}\nI'll remind you {} before!",
        extracted.kind,
        reminder.id.short(),
        offsets_phrase(&user.reminder_timing)
    ));
    text
}

/// `[48, 24, 1]` -> `48h, 24h and 1h`.
fn offsets_phrase(offsets: &[u32]) -> String {
    let hours: Vec<String> = offsets.iter().map(|h| format!("{h}h")).collect();
    match hours.split_last() {
        None => "at the deadline".to_string(),
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} and {last}", rest.join(", ")),
    }
}
