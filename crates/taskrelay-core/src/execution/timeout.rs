//! Optional deadline around a tool call's await points.

use std::future::Future;
use std::time::Duration;

use crate::config::is_background_tool;
use crate::error::{Result, ToolExecutionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStrategy {
    Bounded(Duration),
    Unbounded,
}

impl TimeoutStrategy {
    /// Bounded only for a positive timeout and a tool that is not one of the
    /// background management tools.
    pub fn for_tool(timeout: Duration, tool_name: &str) -> Self {
        if should_enable_timeout(timeout, tool_name) {
            Self::Bounded(timeout)
        } else {
            Self::Unbounded
        }
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self, Self::Bounded(_))
    }

    /// Await `future`, failing with [`ToolExecutionError::Timeout`] once the
    /// deadline passes. The future is dropped on timeout.
    pub async fn execute<F: Future>(&self, future: F) -> Result<F::Output> {
        match self {
            Self::Bounded(limit) => tokio::time::timeout(*limit, future)
                .await
                .map_err(|_| ToolExecutionError::Timeout(*limit)),
            Self::Unbounded => Ok(future.await),
        }
    }
}

pub fn should_enable_timeout(timeout: Duration, tool_name: &str) -> bool {
    !timeout.is_zero() && !is_background_tool(tool_name)
}
