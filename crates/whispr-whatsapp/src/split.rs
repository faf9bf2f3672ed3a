//! Body splitting for the WhatsApp message size limit.

/// Twilio rejects WhatsApp bodies longer than this many characters.
pub const BODY_MAX: usize = 1600;

/// Split `text` into bodies of at most [`BODY_MAX`] characters, preferring
/// line boundaries, then spaces. Limits count characters, not bytes.
pub fn split_body(text: &str) -> Vec<String> {
    if text.chars().count() <= BODY_MAX {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        let cost = if current.is_empty() { line_len } else { line_len + 1 };

        if !current.is_empty() && current_len + cost > BODY_MAX {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    // A single line can still be over the limit.
    let mut result = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let mut rest = chunk.as_str();
        while rest.chars().count() > BODY_MAX {
            let limit = byte_index(rest, BODY_MAX);
            let split_at = rest[..limit]
                .rfind('\n')
                .or_else(|| rest[..limit].rfind(' '))
                .filter(|&i| i > 0)
                .unwrap_or(limit);
            result.push(rest[..split_at].to_string());
            rest = rest[split_at..].trim_start();
        }
        if !rest.is_empty() {
            result.push(rest.to_string());
        }
    }
    result
}

/// Byte offset of the `n`th character of `s` (or `s.len()`).
fn byte_index(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}
