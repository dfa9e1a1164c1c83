//! Error types shared by handlers and queues.

use thiserror::Error;

/// A caller's wait was cut short because new activity arrived for its session.
///
/// This is not a failure: the task being waited on keeps running. It travels
/// through handler results so the surrounding response cycle can end quietly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Wait for task {task_id} interrupted by new activity in session {session_id}")]
pub struct WaitInterrupted {
    pub task_id: String,
    pub session_id: String,
}

impl WaitInterrupted {
    pub fn new(task_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            session_id: session_id.into(),
        }
    }
}

/// Errors produced by a tool handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler ran and failed.
    #[error("{kind}: {message}")]
    Failed { kind: String, message: String },

    /// The handler was asked to stop waiting; see [`WaitInterrupted`].
    #[error(transparent)]
    Interrupted(#[from] WaitInterrupted),

    /// Arguments could not be interpreted by the handler.
    #[error("InvalidArguments: {0}")]
    InvalidArguments(String),
}

impl HandlerError {
    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Short type label for summaries shown to users.
    pub fn kind(&self) -> &str {
        match self {
            Self::Failed { kind, .. } => kind,
            Self::Interrupted(_) => "WaitInterrupted",
            Self::InvalidArguments(_) => "InvalidArguments",
        }
    }

    /// Message without the kind prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Failed { message, .. } => message.clone(),
            Self::Interrupted(inner) => inner.to_string(),
            Self::InvalidArguments(message) => message.clone(),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<WaitInterrupted>() {
            Ok(interrupted) => Self::Interrupted(interrupted),
            Err(err) => Self::failed("Error", format!("{err:#}")),
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArguments(err.to_string())
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        Self::failed("IoError", err.to_string())
    }
}

/// Errors raised when pushing onto an [`EventQueue`](crate::queue::EventQueue).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("event queue is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, HandlerError>;
