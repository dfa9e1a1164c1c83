//! Routes a tool call by tool kind: local function, remote server or agent
//! handoff.

use std::sync::Arc;

use futures::stream;
use serde_json::Value;
use taskrelay_traits::{
    CallToolResult, FunctionTool, HandoffRequest, HandoffTool, RemoteTool, ToolArgs,
};
use tracing::{debug, info};

use crate::error::{Result, ToolExecutionError};

use super::context::RunContext;
use super::executor::{ToolExecutor, ToolResultStream};
use super::timeout::TimeoutStrategy;

/// Every tool an agent can call.
#[derive(Clone)]
pub enum AgentTool {
    Local(Arc<dyn FunctionTool>),
    Remote(Arc<dyn RemoteTool>),
    Handoff(Arc<HandoffTool>),
}

impl AgentTool {
    pub fn name(&self) -> String {
        match self {
            Self::Local(tool) => tool.name().to_string(),
            Self::Remote(tool) => tool.name().to_string(),
            Self::Handoff(tool) => tool.name(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Remote(_) => "remote",
            Self::Handoff(_) => "handoff",
        }
    }
}

impl std::fmt::Debug for AgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTool")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .finish()
    }
}

impl From<Arc<dyn FunctionTool>> for AgentTool {
    fn from(tool: Arc<dyn FunctionTool>) -> Self {
        Self::Local(tool)
    }
}

impl From<Arc<dyn RemoteTool>> for AgentTool {
    fn from(tool: Arc<dyn RemoteTool>) -> Self {
        Self::Remote(tool)
    }
}

impl From<HandoffTool> for AgentTool {
    fn from(tool: HandoffTool) -> Self {
        Self::Handoff(Arc::new(tool))
    }
}

/// Executes any [`AgentTool`].
#[derive(Debug)]
pub struct FunctionToolExecutor {
    local: ToolExecutor,
}

impl FunctionToolExecutor {
    pub fn new(local: ToolExecutor) -> Self {
        Self { local }
    }

    pub fn local(&self) -> &ToolExecutor {
        &self.local
    }

    pub async fn execute(
        &self,
        tool: &AgentTool,
        ctx: Arc<RunContext>,
        args: ToolArgs,
    ) -> Result<ToolResultStream> {
        debug!(tool = %tool.name(), kind = tool.kind(), "Dispatching tool call");
        match tool {
            AgentTool::Local(tool) => self.local.execute(tool.as_ref(), ctx, args),
            AgentTool::Remote(tool) => Self::execute_remote(tool.as_ref(), &ctx, args).await,
            AgentTool::Handoff(tool) => Self::execute_handoff(tool, &ctx, args).await,
        }
    }

    async fn execute_remote(
        tool: &dyn RemoteTool,
        ctx: &RunContext,
        args: ToolArgs,
    ) -> Result<ToolResultStream> {
        let strategy = TimeoutStrategy::for_tool(ctx.tool_call_timeout(), tool.name());
        let result = strategy.execute(tool.call(args)).await??;
        let items: Vec<Result<CallToolResult>> = result.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(items)))
    }

    async fn execute_handoff(
        tool: &HandoffTool,
        ctx: &RunContext,
        args: ToolArgs,
    ) -> Result<ToolResultStream> {
        let input = match args.get("input") {
            Some(Value::String(input)) => input.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        info!(agent = %tool.agent_name, session_id = %ctx.session_id(), "Handing off to sub-agent");

        let request = HandoffRequest {
            event: ctx.event().clone(),
            agent_name: tool.agent_name.clone(),
            instructions: tool.instructions.clone(),
            input,
            tools: tool.tools.clone(),
        };
        let completion = tool
            .runner
            .run(request)
            .await
            .map_err(ToolExecutionError::from)?;
        let item: Result<CallToolResult> = Ok(CallToolResult::text_result(completion));
        Ok(Box::pin(stream::once(async move { item })))
    }
}
