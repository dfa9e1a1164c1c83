//! Redaction of secrets before arguments or errors reach logs.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

pub const MASK: &str = "***REDACTED***";

/// Default per-value display limit in characters.
pub const DEFAULT_MAX_VALUE_LENGTH: usize = 100;

const TRUNCATED_SUFFIX: &str = "...(truncated)";

/// Key fragments that mark a parameter as sensitive (case-insensitive substring).
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "password",
    "passwd",
    "pwd",
    "token",
    "api_key",
    "apikey",
    "secret",
    "credential",
    "auth",
    "private_key",
    "privatekey",
    "access_key",
    "key",
    "session_id",
    "cookie",
];

static SENSITIVE_VALUE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(bearer\s+)[a-z0-9\-_.]+",
        r"(?i)(api[_-]?key[=:]\s*)[a-z0-9\-_.]+",
        r"sk-[a-zA-Z0-9]{20,}",
        r"ghp_[a-zA-Z0-9]{36,}",
        r"gho_[a-zA-Z0-9]{36,}",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEY_FRAGMENTS.iter().any(|f| key.contains(f))
}

/// Mask secret-looking substrings inside a value.
pub fn mask_sensitive_value(value: &str) -> String {
    let mut masked = value.to_string();
    for pattern in SENSITIVE_VALUE_PATTERNS.iter() {
        masked = pattern
            .replace_all(&masked, |caps: &Captures| {
                let prefix = caps.get(1).map_or("", |m| m.as_str());
                format!("{prefix}{MASK}")
            })
            .into_owned();
    }
    masked
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}{TRUNCATED_SUFFIX}", &text[..idx]),
        None => text.to_string(),
    }
}

fn sanitize_value(value: &Value, max_value_length: usize) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_chars(&mask_sensitive_value(s), max_value_length)),
        Value::Object(map) => Value::Object(sanitize_params(map, max_value_length)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Value::String(mask_sensitive_value(s)),
                    Value::Object(map) => Value::Object(sanitize_params(map, max_value_length)),
                    other => other.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Redacted copy of a parameter map.
pub fn sanitize_params(params: &Map<String, Value>, max_value_length: usize) -> Map<String, Value> {
    params
        .iter()
        .map(|(key, value)| {
            let value = if is_sensitive_key(key) {
                Value::String(MASK.to_string())
            } else {
                sanitize_value(value, max_value_length)
            };
            (key.clone(), value)
        })
        .collect()
}

/// Redacted parameters rendered for a log line.
pub fn sanitize_for_log(params: &Map<String, Value>) -> String {
    Value::Object(sanitize_params(params, DEFAULT_MAX_VALUE_LENGTH)).to_string()
}

/// Redact and bound free text such as an error message.
pub fn sanitize_text(text: &str, max_chars: usize) -> String {
    truncate_chars(&mask_sensitive_value(text), max_chars)
}
