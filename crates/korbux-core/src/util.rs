//! Helpers handed to agents through the context and used by the pipeline.

use chrono::{SecondsFormat, Utc};

/// Deterministic 32-bit seed for a string (`h = h * 31 + c`, wrapping).
pub fn seed_from_str(input: &str) -> u32 {
    input
        .chars()
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32))
}

/// Truncates `text` to at most `max_chars` characters.
/// Returns the (possibly shortened) text and whether anything was cut.
pub fn truncate(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (text[..byte_idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

/// Current UTC time as RFC 3339 with millisecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Removes control characters (except newline and tab) and angle brackets, then trims.
pub fn sanitize(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '<' | '>'))
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect::<String>()
        .trim()
        .to_string()
}
