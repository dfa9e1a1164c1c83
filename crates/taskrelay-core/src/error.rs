use std::time::Duration;

use taskrelay_traits::{HandlerError, WaitInterrupted};
use thiserror::Error;

/// Errors raised while executing a single tool call.
#[derive(Debug, Error)]
pub enum ToolExecutionError {
    #[error("Method resolution failed for tool '{tool}': {message}")]
    MethodResolution { tool: String, message: String },

    #[error("{0}")]
    ParameterValidation(String),

    /// Internal to the bounded strategy; the trigger for background escalation.
    #[error("Tool call timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Background task error: {0}")]
    BackgroundTask(String),

    #[error(transparent)]
    Interrupted(WaitInterrupted),

    #[error("Tool execution failed: {0}")]
    Handler(HandlerError),
}

impl ToolExecutionError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }
}

impl From<HandlerError> for ToolExecutionError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::Interrupted(inner) => Self::Interrupted(inner),
            other => Self::Handler(other),
        }
    }
}

impl From<WaitInterrupted> for ToolExecutionError {
    fn from(err: WaitInterrupted) -> Self {
        Self::Interrupted(err)
    }
}

/// Identifier or number rejected at a tool boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("{field} contains invalid characters")]
    InvalidCharacters { field: &'static str },

    #[error("{field} must be a positive integer")]
    NotPositive { field: String },

    #[error("{field} must be at most {max}")]
    OutOfRange { field: String, max: u64 },
}

pub type Result<T> = std::result::Result<T, ToolExecutionError>;
