//! Text helpers shared by the pipeline: topic normalization, similarity,
//! word caps and JSON extraction from free-form provider output.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z0-9_-]*\s*(.*?)\s*```$").unwrap());

/// Lowercase and collapse runs of whitespace.
pub fn collapse_whitespace_lower(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized form used for topic comparison: punctuation is dropped as well.
pub fn normalize_topic(text: &str) -> String {
    let stripped: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    collapse_whitespace_lower(&stripped)
}

/// Sørensen–Dice similarity of two topics after normalization, in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (normalize_topic(a), normalize_topic(b));
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    strsim::sorensen_dice(&a, &b)
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Keep at most `max_words` words. Whitespace inside the kept prefix is preserved.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    if max_words == 0 {
        return String::new();
    }
    let mut seen = 0;
    let mut in_word = false;
    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if in_word && seen == max_words {
                return text[..idx].trim().to_string();
            }
            in_word = false;
        } else if !in_word {
            in_word = true;
            seen += 1;
        }
    }
    text.trim().to_string()
}

/// Strip a surrounding markdown code fence, if any.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    FENCE_RE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed)
}

/// Find the JSON object in a provider reply.
///
/// Accepts a bare object, a fenced object, or an object embedded in prose
/// (first `{` to last `}`).
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let body = strip_code_fence(text);
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        return Some(map);
    }

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&body[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Read a list of strings from a JSON field, tolerating a single string.
pub fn string_list(map: &Map<String, Value>, key: &str) -> Vec<String> {
    match map.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Read a trimmed, non-empty string field.
pub fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
