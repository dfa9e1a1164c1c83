//! Input checks for identifiers and numbers received from the model.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ValidationError;

const MAX_SESSION_ID_LEN: usize = 256;

static TASK_ID_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_\-]{1,128}$").ok());

pub fn validate_task_id(task_id: &str) -> Result<&str, ValidationError> {
    if task_id.is_empty() {
        return Err(ValidationError::Empty { field: "task_id" });
    }
    let valid = TASK_ID_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(task_id));
    if !valid {
        return Err(ValidationError::InvalidCharacters { field: "task_id" });
    }
    Ok(task_id)
}

/// Session ids are opaque (they may contain `:` or `/`) but must be a single line.
pub fn validate_session_id(session_id: &str) -> Result<&str, ValidationError> {
    if session_id.is_empty() {
        return Err(ValidationError::Empty {
            field: "session_id",
        });
    }
    if session_id.chars().count() > MAX_SESSION_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "session_id",
            max: MAX_SESSION_ID_LEN,
        });
    }
    if session_id.contains(['\0', '\n', '\r']) {
        return Err(ValidationError::InvalidCharacters {
            field: "session_id",
        });
    }
    Ok(session_id)
}

pub fn validate_positive_int(name: &str, value: i64, max: u64) -> Result<u64, ValidationError> {
    if value <= 0 {
        return Err(ValidationError::NotPositive {
            field: name.to_string(),
        });
    }
    let value = value as u64;
    if value > max {
        return Err(ValidationError::OutOfRange {
            field: name.to_string(),
            max,
        });
    }
    Ok(value)
}
