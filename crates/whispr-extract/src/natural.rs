//! Finding a deadline written in plain English ("Friday 5pm", "tomorrow",
//! "next Monday 9am") inside free text.

use chrono::{DateTime, Duration, Utc, Weekday};
use chrono_english::{parse_date_string, Dialect};

/// Longest run of words tried as one date phrase.
const MAX_PHRASE_WORDS: usize = 5;

/// Resolve the first date phrase in `text` relative to `now`, preferring
/// longer phrases. Only future instants are returned; a weekday that already
/// passed this week rolls over to next week.
pub fn find_deadline(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let words: Vec<String> = text
        .split_whitespace()
        .map(clean_word)
        .filter(|w| !w.is_empty())
        .collect();

    for len in (1..=MAX_PHRASE_WORDS.min(words.len())).rev() {
        for window in words.windows(len) {
            if let Some(deadline) = resolve(window, now) {
                return Some(deadline);
            }
        }
    }
    None
}

fn resolve(window: &[String], now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let phrase = window.join(" ");
    let parsed = parse_date_string(&phrase, now, Dialect::Uk).ok()?;
    if parsed > now {
        return Some(parsed);
    }
    let names_weekday = window.iter().any(|w| w.parse::<Weekday>().is_ok());
    names_weekday
        .then(|| parsed + Duration::days(7))
        .filter(|next| *next > now)
}

/// Lowercase and drop sentence punctuation around a word; `:` `/` `-`
/// inside times and dates are kept.
fn clean_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}
