//! Hand-off from a timed-out tool call to a background task.

use std::sync::Arc;

use async_trait::async_trait;
use taskrelay_traits::{AgentEvent, CallToolResult, EventQueue, ToolArgs, ToolHandler};
use tracing::info;

use crate::background::{BackgroundToolManager, SubmitRequest};
use crate::error::Result;

/// What a timed-out call needs to be restarted in the background.
#[derive(Clone)]
pub struct TimeoutContext {
    pub tool_name: String,
    pub tool_args: ToolArgs,
    pub session_id: String,
    pub handler: Arc<dyn ToolHandler>,
    pub event: Option<Arc<AgentEvent>>,
    pub event_queue: Option<Arc<dyn EventQueue>>,
}

impl std::fmt::Debug for TimeoutContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutContext")
            .field("tool_name", &self.tool_name)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// Recovers from a tool-call timeout.
#[async_trait]
pub trait TimeoutHandler: Send + Sync {
    /// Produce the single result returned to the model in place of the
    /// timed-out call.
    async fn handle_timeout(&self, context: TimeoutContext) -> Result<CallToolResult>;
}

/// Restarts the call as a detached background task.
pub struct BackgroundHandler {
    manager: Arc<BackgroundToolManager>,
}

impl BackgroundHandler {
    pub fn new(manager: Arc<BackgroundToolManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<BackgroundToolManager> {
        &self.manager
    }
}

pub fn background_notice(tool_name: &str, task_id: &str) -> String {
    format!(
        "Tool '{tool_name}' switched to background.\nTask ID: {task_id}\nUse get_tool_output/wait_tool_result to check."
    )
}

#[async_trait]
impl TimeoutHandler for BackgroundHandler {
    async fn handle_timeout(&self, context: TimeoutContext) -> Result<CallToolResult> {
        let tool_name = context.tool_name.clone();
        let mut request = SubmitRequest::new(
            context.tool_name,
            context.tool_args,
            context.session_id,
            context.handler,
        )
        .detached();
        if let Some(event) = context.event {
            request = request.with_event(event);
        }
        if let Some(queue) = context.event_queue {
            request = request.with_event_queue(queue);
        }

        let task_id = self.manager.submit_task(request).await?;
        info!(task_id = %task_id, tool = %tool_name, "Tool call switched to background");
        Ok(CallToolResult::text_result(background_notice(
            &tool_name, &task_id,
        )))
    }
}
