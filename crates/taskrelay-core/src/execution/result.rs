//! Normalizes raw handler values into structured tool results.

use std::sync::Arc;

use taskrelay_traits::{CallToolResult, ToolValue};
use tracing::{debug, error};

use super::context::RunContext;

/// Message kind used for chains delivered through the direct-send channel.
pub const DIRECT_RESULT_KIND: &str = "tool_direct_result";

#[derive(Debug, Default)]
pub struct ResultProcessor {
    context: Option<Arc<RunContext>>,
}

impl ResultProcessor {
    pub fn new(context: Arc<RunContext>) -> Self {
        Self {
            context: Some(context),
        }
    }

    /// A processor with no context; `None` values are simply dropped.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Wrap a value for the model. `None` returns nothing to the model and
    /// flushes any chain parked for direct delivery.
    pub async fn process(&self, value: Option<ToolValue>) -> Option<CallToolResult> {
        match value {
            Some(ToolValue::CallResult(result)) => Some(result),
            Some(ToolValue::Message(chain)) => {
                if let Some(ctx) = &self.context {
                    ctx.set_pending_result(chain);
                }
                self.send_direct_message().await;
                None
            }
            Some(other) => Some(CallToolResult::text_result(other.to_text())),
            None => {
                self.send_direct_message().await;
                None
            }
        }
    }

    async fn send_direct_message(&self) {
        let Some(ctx) = &self.context else {
            return;
        };
        let Some(chain) = ctx.take_pending_result().filter(|c| !c.is_empty()) else {
            return;
        };
        let Some(sender) = ctx.direct_sender() else {
            debug!(session_id = %ctx.session_id(), "No direct sender, dropping tool message");
            return;
        };
        if let Err(e) = sender
            .send(ctx.event(), chain.with_kind(DIRECT_RESULT_KIND))
            .await
        {
            error!(session_id = %ctx.session_id(), error = %e, "Failed to send tool result directly");
        }
    }
}
