//! Turning model output into an [`Extracted`] value.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use whispr_core::reminder::{Extracted, ReminderKind};

use crate::error::{ExtractError, Result};
use crate::natural::find_deadline;

/// Characters of the original message kept as the task when extraction
/// fails.
pub const FALLBACK_TASK_CHARS: usize = 100;

/// Shape the model is asked to answer with. Every field is optional so a
/// partially filled answer still yields something.
#[derive(Debug, Deserialize)]
struct ModelAnswer {
    task: Option<String>,
    course: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    deadline: Option<String>,
    location: Option<String>,
    notes: Option<String>,
}

/// Remove a surrounding markdown code fence (```json … ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`) up to the first newline.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a deadline as written by the model.
///
/// Accepts RFC 3339, and naive `YYYY-MM-DD[ HH:MM[:SS]]` or
/// `YYYY-MM-DDTHH:MM[:SS]` which are read as UTC. A bare date is midnight UTC.
pub fn parse_deadline(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Parse the model's text answer for `message`.
///
/// A deadline the model wrote in words is resolved against `now`; when the
/// model found none, the message itself is searched.
pub fn parse_model_answer(text: &str, message: &str, now: DateTime<Utc>) -> Result<Extracted> {
    let answer: ModelAnswer = serde_json::from_str(strip_code_fences(text))
        .map_err(|e| ExtractError::Parse(e.to_string()))?;

    let task = answer
        .task
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| fallback_task(message));

    Ok(Extracted {
        task,
        course: non_empty(answer.course),
        kind: answer
            .kind
            .and_then(|k| k.trim().to_ascii_lowercase().parse::<ReminderKind>().ok())
            .unwrap_or_default(),
        deadline: answer
            .deadline
            .as_deref()
            .and_then(|raw| parse_deadline(raw).or_else(|| find_deadline(raw, now)))
            .or_else(|| find_deadline(message, now)),
        location: non_empty(answer.location),
        notes: non_empty(answer.notes),
    })
}

/// Extraction used when the model is unavailable or its answer unusable.
pub fn fallback_extraction(message: &str, now: DateTime<Utc>) -> Extracted {
    let extracted = Extracted::task(fallback_task(message));
    match find_deadline(message, now) {
        Some(deadline) => extracted.with_deadline(deadline),
        None => extracted,
    }
}

fn fallback_task(message: &str) -> String {
    message.trim().chars().take(FALLBACK_TASK_CHARS).collect()
}

/// Models like to answer "null" or "" instead of leaving a field out.
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Duration, TimeZone, Weekday};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```\n"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn deadline_formats() {
        let expected = Utc.with_ymd_and_hms(2026, 5, 1, 23, 59, 0).unwrap();
        assert_eq!(parse_deadline("2026-05-01T23:59:00Z"), Some(expected));
        assert_eq!(parse_deadline("2026-05-02T00:59:00+01:00"), Some(expected));
        assert_eq!(parse_deadline("2026-05-01T23:59:00"), Some(expected));
        assert_eq!(parse_deadline("2026-05-01T23:59"), Some(expected));
        assert_eq!(parse_deadline("2026-05-01 23:59"), Some(expected));
        assert_eq!(
            parse_deadline("2026-05-01"),
            Some(Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_deadline("next Friday"), None);
        assert_eq!(parse_deadline("null"), None);
    }

    #[test]
    fn full_answer_is_mapped() {
        let text = r#"```json
{
  "task": "Submit lab report",
  "course": "CSC 201",
  "type": "Assignment",
  "deadline": "2026-05-01T23:59:00Z",
  "location": null,
  "notes": "Use the portal"
}
```"#;
        let extracted = parse_model_answer(text, "original", now()).unwrap();
        assert_eq!(extracted.task, "Submit lab report");
        assert_eq!(extracted.course.as_deref(), Some("CSC 201"));
        assert_eq!(extracted.kind, ReminderKind::Assignment);
        assert!(extracted.deadline.is_some());
        assert_eq!(extracted.location, None);
        assert_eq!(extracted.notes.as_deref(), Some("Use the portal"));
    }

    #[test]
    fn unknown_type_and_missing_task_degrade() {
        let text = r#"{"type": "seminar", "deadline": null, "course": "null"}"#;
        let extracted = parse_model_answer(text, "Seminar notes", now()).unwrap();
        assert_eq!(extracted.task, "Seminar notes");
        assert_eq!(extracted.kind, ReminderKind::Other);
        assert_eq!(extracted.deadline, None);
        assert_eq!(extracted.course, None);
    }

    #[test]
    fn worded_deadline_is_resolved_forward() {
        let text = r#"{"task": "Seminar", "type": "event", "deadline": "tomorrow"}"#;
        let extracted = parse_model_answer(text, "Seminar", now()).unwrap();
        assert_eq!(
            extracted.deadline.map(|d| d.date_naive()),
            Some((now() + Duration::days(1)).date_naive())
        );
    }

    #[test]
    fn missing_model_deadline_is_read_from_message() {
        let text = r#"{"task": "Assignment", "type": "assignment", "deadline": null}"#;
        let extracted = parse_model_answer(text, "Assignment due Friday 5pm", now()).unwrap();
        let deadline = extracted.deadline.unwrap();
        assert_eq!(deadline.weekday(), Weekday::Fri);
        assert!(deadline > now());
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(
            parse_model_answer("Sorry, I can't help", "msg", now()),
            Err(ExtractError::Parse(_))
        ));
    }

    #[test]
    fn fallback_keeps_first_hundred_characters() {
        let message = "a".repeat(250);
        let extracted = fallback_extraction(&message, now());
        assert_eq!(extracted.task.chars().count(), 100);
        assert_eq!(extracted.kind, ReminderKind::Other);
        assert_eq!(extracted.deadline, None);
    }

    #[test]
    fn fallback_reads_deadline_from_message() {
        let extracted = fallback_extraction("Assignment due Friday 5pm", now());
        assert_eq!(extracted.task, "Assignment due Friday 5pm");
        assert_eq!(extracted.deadline.map(|d| d.weekday()), Some(Weekday::Fri));
    }
}
