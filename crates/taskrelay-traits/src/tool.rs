//! Tool traits and types for agent tools.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::event::AgentEvent;
use crate::handler::{ToolArgs, ToolHandler};

/// JSON Schema for tool parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value, // JSON Schema object
}

/// One content block of a structured tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
    Image { data: String, mime_type: String },
}

/// Structured result handed back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Create a text result.
    pub fn text_result(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Create an error result.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// All text blocks joined by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                ToolContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A tool implemented in-process.
///
/// A tool exposes up to three entry points. Callers pick the first one present
/// in this order: [`handler`](Self::handler), [`call`](Self::call),
/// [`run`](Self::run).
pub trait FunctionTool: Send + Sync {
    /// Unique tool name (used in LLM function calls).
    fn name(&self) -> &str;

    /// Human-readable description for LLM context.
    fn description(&self) -> &str;

    /// JSON Schema for input parameters.
    fn parameters_schema(&self) -> Value;

    /// Explicitly attached handler function.
    fn handler(&self) -> Option<Arc<dyn ToolHandler>> {
        None
    }

    /// Overridden call entry point. Receives the run context's event.
    fn call(&self) -> Option<Arc<dyn ToolHandler>> {
        None
    }

    /// Legacy run entry point.
    fn run(&self) -> Option<Arc<dyn ToolHandler>> {
        None
    }

    /// Per-tool timeout override in seconds; `None` uses the run context's.
    fn timeout_secs(&self) -> Option<u64> {
        None
    }

    /// Build complete schema for LLM.
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A [`FunctionTool`] assembled from parts.
#[derive(Clone)]
pub struct LocalTool {
    name: String,
    description: String,
    parameters: Value,
    handler: Option<Arc<dyn ToolHandler>>,
    call: Option<Arc<dyn ToolHandler>>,
    run: Option<Arc<dyn ToolHandler>>,
    timeout_secs: Option<u64>,
}

impl LocalTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
            handler: None,
            call: None,
            run: None,
            timeout_secs: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_handler(mut self, handler: impl ToolHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn with_call(mut self, call: impl ToolHandler + 'static) -> Self {
        self.call = Some(Arc::new(call));
        self
    }

    pub fn with_run(mut self, run: impl ToolHandler + 'static) -> Self {
        self.run = Some(Arc::new(run));
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

impl FunctionTool for LocalTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    fn handler(&self) -> Option<Arc<dyn ToolHandler>> {
        self.handler.clone()
    }

    fn call(&self) -> Option<Arc<dyn ToolHandler>> {
        self.call.clone()
    }

    fn run(&self) -> Option<Arc<dyn ToolHandler>> {
        self.run.clone()
    }

    fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }
}

impl fmt::Debug for LocalTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTool")
            .field("name", &self.name)
            .field("has_handler", &self.handler.is_some())
            .field("has_call", &self.call.is_some())
            .field("has_run", &self.run.is_some())
            .finish()
    }
}

/// A tool served by a remote server (for example over MCP).
#[async_trait]
pub trait RemoteTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value;

    /// Call the remote tool. `None` means the server returned nothing.
    async fn call(&self, args: ToolArgs) -> Result<Option<CallToolResult>>;
}

/// Everything a sub-agent run needs.
pub struct HandoffRequest {
    pub event: Arc<AgentEvent>,
    pub agent_name: String,
    pub instructions: String,
    pub input: String,
    pub tools: Vec<Arc<dyn FunctionTool>>,
}

/// Runs a sub-agent to completion and returns its final answer.
#[async_trait]
pub trait SubAgentRunner: Send + Sync {
    async fn run(&self, request: HandoffRequest) -> Result<String>;
}

/// A tool that transfers the conversation to another agent.
#[derive(Clone)]
pub struct HandoffTool {
    pub agent_name: String,
    pub description: String,
    pub instructions: String,
    pub tools: Vec<Arc<dyn FunctionTool>>,
    pub runner: Arc<dyn SubAgentRunner>,
}

impl HandoffTool {
    /// Handoff tools are named after the agent they transfer to.
    pub fn name(&self) -> String {
        format!("transfer_to_{}", self.agent_name)
    }

    pub fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "input": {
                    "type": "string",
                    "description": "The input to be handed off to another agent."
                }
            }
        })
    }
}

impl fmt::Debug for HandoffTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffTool")
            .field("agent_name", &self.agent_name)
            .field("tools", &self.tools.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerOutput, handler_fn};

    #[test]
    fn test_call_tool_result_text_skips_images() {
        let result = CallToolResult {
            content: vec![
                ToolContent::Text {
                    text: "one".into(),
                },
                ToolContent::Image {
                    data: "AAAA".into(),
                    mime_type: "image/png".into(),
                },
                ToolContent::Text {
                    text: "two".into(),
                },
            ],
            is_error: false,
        };
        assert_eq!(result.text(), "one\ntwo");
    }

    #[test]
    fn test_local_tool_schema() {
        let tool = LocalTool::new("echo", "Echo input").with_handler(handler_fn(
            |_event, _args| async { Ok(HandlerOutput::none()) },
        ));
        let schema = tool.schema();
        assert_eq!(schema.name, "echo");
        assert_eq!(schema.description, "Echo input");
        assert!(tool.handler().is_some());
        assert!(tool.call().is_none());
        assert!(tool.run().is_none());
    }
}
