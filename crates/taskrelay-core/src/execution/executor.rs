//! Tool call orchestration.
//!
//! # Timeout and escalation
//!
//! Each await on the handler's output is raced against the tool-call timeout
//! (the tool's own `timeout_secs` when set, otherwise the run context's). When
//! the deadline passes the in-flight call is dropped, the same handler is
//! restarted through the [`TimeoutHandler`] (by default as a detached
//! background task) and its single hand-off result ends the stream.
//!
//! The background management tools are never bounded, and a zero timeout
//! disables the race entirely.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use taskrelay_traits::{CallToolResult, FunctionTool, ToolArgs};
use tracing::{debug, info};

use crate::background::BackgroundToolManager;
use crate::error::{Result, ToolExecutionError};

use super::background_handler::{BackgroundHandler, TimeoutContext, TimeoutHandler};
use super::context::RunContext;
use super::invoker;
use super::resolver::MethodResolver;
use super::result::ResultProcessor;
use super::timeout::TimeoutStrategy;
use super::validator::ParameterValidator;

/// Structured results of one tool call, in order.
pub type ToolResultStream = BoxStream<'static, Result<CallToolResult>>;

pub struct ToolExecutor {
    resolver: MethodResolver,
    validator: ParameterValidator,
    timeout_handler: Arc<dyn TimeoutHandler>,
}

impl ToolExecutor {
    pub fn new(timeout_handler: Arc<dyn TimeoutHandler>) -> Self {
        Self {
            resolver: MethodResolver::new(),
            validator: ParameterValidator::new(),
            timeout_handler,
        }
    }

    /// Escalate timed-out calls to `manager`.
    pub fn with_background(manager: Arc<BackgroundToolManager>) -> Self {
        Self::new(Arc::new(BackgroundHandler::new(manager)))
    }

    /// Effective timeout for `tool` under `ctx`.
    pub fn tool_timeout(tool: &dyn FunctionTool, ctx: &RunContext) -> Duration {
        tool.timeout_secs()
            .map(Duration::from_secs)
            .unwrap_or_else(|| ctx.tool_call_timeout())
    }

    /// Start one tool call.
    ///
    /// Resolution and parameter errors are returned here; everything after
    /// the handler starts arrives through the stream.
    pub fn execute(
        &self,
        tool: &dyn FunctionTool,
        ctx: Arc<RunContext>,
        args: ToolArgs,
    ) -> Result<ToolResultStream> {
        let resolved = self.resolver.resolve(tool)?;
        self.validator.validate(resolved.handler.as_ref(), &args)?;

        let tool_name = tool.name().to_string();
        let strategy = TimeoutStrategy::for_tool(Self::tool_timeout(tool, &ctx), &tool_name);
        debug!(
            tool = %tool_name,
            method = %resolved.method,
            bounded = strategy.is_bounded(),
            "Executing tool"
        );

        let timeout_handler = self.timeout_handler.clone();
        let processor = ResultProcessor::new(ctx.clone());
        let mut raw = invoker::invoke(ctx.clone(), &resolved, args.clone());
        let handler = resolved.handler;

        Ok(Box::pin(async_stream::try_stream! {
            loop {
                let next = match strategy.execute(raw.next()).await {
                    Ok(next) => next,
                    Err(ToolExecutionError::Timeout(limit)) => {
                        info!(
                            tool = %tool_name,
                            timeout_secs = limit.as_secs_f64(),
                            "Tool call timed out, escalating"
                        );
                        let context = TimeoutContext {
                            tool_name: tool_name.clone(),
                            tool_args: args.clone(),
                            session_id: ctx.session_id().to_string(),
                            handler: handler.clone(),
                            event: Some(ctx.event().clone()),
                            event_queue: ctx.event_queue(),
                        };
                        let notice = timeout_handler.handle_timeout(context).await?;
                        yield notice;
                        break;
                    }
                    Err(other) => Err(other)?,
                };
                let Some(item) = next else {
                    break;
                };
                let value = item.map_err(ToolExecutionError::from)?;
                if let Some(result) = processor.process(value).await {
                    yield result;
                }
            }
        }))
    }
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::TryStreamExt;
    use parking_lot::Mutex;
    use serde_json::json;
    use taskrelay_traits::{
        AgentEvent, HandlerError, HandlerOutput, HandlerParam, LocalTool, ToolValue, handler_fn,
    };

    /// Records timeouts instead of starting background work.
    #[derive(Default)]
    struct RecordingTimeouts {
        seen: Mutex<Vec<TimeoutContext>>,
    }

    #[async_trait]
    impl TimeoutHandler for RecordingTimeouts {
        async fn handle_timeout(&self, context: TimeoutContext) -> Result<CallToolResult> {
            let text = format!("escalated {}", context.tool_name);
            self.seen.lock().push(context);
            Ok(CallToolResult::text_result(text))
        }
    }

    fn ctx(timeout_secs: u64) -> Arc<RunContext> {
        Arc::new(
            RunContext::new(Arc::new(AgentEvent::new("cli", "s1", "go")))
                .with_tool_call_timeout(Duration::from_secs(timeout_secs)),
        )
    }

    fn slow_tool(name: &str, secs: u64) -> LocalTool {
        LocalTool::new(name, "slow").with_handler(handler_fn(move |_event, _args| async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            Ok(HandlerOutput::text("slow done"))
        }))
    }

    async fn collect(stream: ToolResultStream) -> Result<Vec<String>> {
        let results: Vec<CallToolResult> = stream.try_collect().await?;
        Ok(results.iter().map(CallToolResult::text).collect())
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_call_returns_result() {
        let timeouts = Arc::new(RecordingTimeouts::default());
        let executor = ToolExecutor::new(timeouts.clone());
        let stream = executor
            .execute(&slow_tool("crawler", 1), ctx(5), ToolArgs::new())
            .expect("starts");
        assert_eq!(collect(stream).await.expect("ok"), vec!["slow done"]);
        assert!(timeouts.seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_escalates_once() {
        let timeouts = Arc::new(RecordingTimeouts::default());
        let executor = ToolExecutor::new(timeouts.clone());
        let mut args = ToolArgs::new();
        args.insert("url".into(), json!("https://example.com"));

        let stream = executor
            .execute(&slow_tool("crawler", 60), ctx(5), args.clone())
            .expect("starts");
        assert_eq!(collect(stream).await.expect("ok"), vec!["escalated crawler"]);

        let seen = timeouts.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].session_id, "s1");
        assert_eq!(seen[0].tool_args, args);
        assert!(seen[0].event.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_timeout_overrides_context() {
        let timeouts = Arc::new(RecordingTimeouts::default());
        let executor = ToolExecutor::new(timeouts.clone());
        let tool = slow_tool("crawler", 10).with_timeout_secs(30);
        let stream = executor.execute(&tool, ctx(5), ToolArgs::new()).expect("starts");
        assert_eq!(collect(stream).await.expect("ok"), vec!["slow done"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_management_tools_and_zero_timeout_are_unbounded() {
        let timeouts = Arc::new(RecordingTimeouts::default());
        let executor = ToolExecutor::new(timeouts.clone());

        let stream = executor
            .execute(&slow_tool("wait_tool_result", 60), ctx(5), ToolArgs::new())
            .expect("starts");
        assert_eq!(collect(stream).await.expect("ok"), vec!["slow done"]);

        let stream = executor
            .execute(&slow_tool("crawler", 60), ctx(0), ToolArgs::new())
            .expect("starts");
        assert_eq!(collect(stream).await.expect("ok"), vec!["slow done"]);
        assert!(timeouts.seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_timeout_applies_per_item() {
        let timeouts = Arc::new(RecordingTimeouts::default());
        let executor = ToolExecutor::new(timeouts.clone());
        let tool = LocalTool::new("ticker", "d").with_handler(handler_fn(|_event, _args| async {
            Ok(HandlerOutput::stream(futures::stream::unfold(0u64, |i| async move {
                if i == 4 {
                    return None;
                }
                tokio::time::sleep(Duration::from_secs(3 + i * 3)).await;
                Some((Ok(Some(ToolValue::Text(format!("tick {i}")))), i + 1))
            })))
        }));

        let stream = executor.execute(&tool, ctx(7), ToolArgs::new()).expect("starts");
        assert_eq!(
            collect(stream).await.expect("ok"),
            vec!["tick 0", "tick 1", "escalated ticker"]
        );
    }

    #[tokio::test]
    async fn test_none_items_are_not_returned() {
        let executor = ToolExecutor::new(Arc::new(RecordingTimeouts::default()));
        let tool = LocalTool::new("quiet", "d")
            .with_handler(handler_fn(|_event, _args| async { Ok(HandlerOutput::none()) }));
        let stream = executor.execute(&tool, ctx(5), ToolArgs::new()).expect("starts");
        assert!(collect(stream).await.expect("ok").is_empty());
    }

    #[tokio::test]
    async fn test_resolution_and_validation_fail_synchronously() {
        let executor = ToolExecutor::new(Arc::new(RecordingTimeouts::default()));

        let err = executor
            .execute(&LocalTool::new("empty", "d"), ctx(5), ToolArgs::new())
            .err()
            .expect("no entry point");
        assert!(matches!(err, ToolExecutionError::MethodResolution { .. }));

        let tool = LocalTool::new("strict", "d").with_handler(
            handler_fn(|_event, _args| async { Ok(HandlerOutput::none()) })
                .with_parameters(vec![HandlerParam::required("url", "str")]),
        );
        let err = executor
            .execute(&tool, ctx(5), ToolArgs::new())
            .err()
            .expect("missing url");
        assert!(matches!(err, ToolExecutionError::ParameterValidation(_)));
    }

    #[tokio::test]
    async fn test_handler_errors_propagate() {
        let executor = ToolExecutor::new(Arc::new(RecordingTimeouts::default()));
        let tool = LocalTool::new("broken", "d").with_handler(handler_fn(|_event, _args| async {
            Err(HandlerError::failed("ValueError", "boom"))
        }));
        let stream = executor.execute(&tool, ctx(5), ToolArgs::new()).expect("starts");
        let err = collect(stream).await.expect_err("handler failed");
        assert!(matches!(err, ToolExecutionError::Handler(_)));
        assert!(err.to_string().contains("boom"));
    }
}
