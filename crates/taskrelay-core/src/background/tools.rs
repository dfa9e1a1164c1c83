//! Tools the model uses to inspect, wait on, stop and list background tasks.
//!
//! All four are exempt from the tool-call timeout; see
//! [`BACKGROUND_TOOL_NAMES`](crate::config::BACKGROUND_TOOL_NAMES).

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use taskrelay_traits::{
    AgentEvent, HandlerError, HandlerOutput, HandlerParam, LocalTool, ToolArgs, ToolRegistry,
    handler_fn,
};
use tracing::{debug, info};

use crate::config::DEFAULT_OUTPUT_LINES;
use crate::validation::{validate_positive_int, validate_task_id};

use super::formatter::build_task_result;
use super::manager::{BackgroundToolManager, WaitOutcome};

pub const GET_TOOL_OUTPUT: &str = "get_tool_output";
pub const WAIT_TOOL_RESULT: &str = "wait_tool_result";
pub const STOP_TOOL: &str = "stop_tool";
pub const LIST_RUNNING_TOOLS: &str = "list_running_tools";

fn default_lines() -> i64 {
    DEFAULT_OUTPUT_LINES as i64
}

#[derive(Debug, Deserialize)]
struct OutputParams {
    task_id: String,
    #[serde(default = "default_lines")]
    lines: i64,
}

#[derive(Debug, Deserialize)]
struct TaskIdParams {
    task_id: String,
}

fn parse<T: for<'de> Deserialize<'de>>(args: ToolArgs) -> Result<T, HandlerError> {
    Ok(serde_json::from_value(Value::Object(args))?)
}

fn not_found(task_id: &str) -> HandlerOutput {
    HandlerOutput::text(format!("Error: Task {task_id} not found."))
}

fn task_id_schema(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

/// Session of the calling conversation, or of the task when no event is present.
fn resolve_session(
    manager: &BackgroundToolManager,
    event: Option<&AgentEvent>,
    task_id: &str,
) -> Option<String> {
    event.map(|e| e.session_id.clone()).or_else(|| {
        manager
            .registry()
            .get(task_id)
            .map(|t| t.session_id().to_string())
    })
}

pub fn get_tool_output_tool(manager: Arc<BackgroundToolManager>) -> LocalTool {
    let handler = handler_fn(move |_event, args| {
        let manager = manager.clone();
        async move {
            let params: OutputParams = parse(args)?;
            if let Err(e) = validate_task_id(&params.task_id) {
                return Ok(HandlerOutput::text(format!("Error: {e}")));
            }
            let max = manager.output_buffer().capacity() as u64;
            let lines = match validate_positive_int("lines", params.lines, max) {
                Ok(lines) => lines as usize,
                Err(e) => return Ok(HandlerOutput::text(format!("Error: {e}"))),
            };

            let Some(task) = manager.registry().get(&params.task_id) else {
                return Ok(not_found(&params.task_id));
            };
            let output = manager.get_task_output(&params.task_id, lines);
            Ok(HandlerOutput::text(build_task_result(&task, Some(&output))))
        }
    })
    .with_parameters(vec![
        HandlerParam::required("task_id", "str"),
        HandlerParam::optional("lines", "int", json!(DEFAULT_OUTPUT_LINES)),
    ]);

    LocalTool::new(
        GET_TOOL_OUTPUT,
        "View the output logs of a background tool. Use this to check the progress of a long-running task.",
    )
    .with_parameters(json!({
        "type": "object",
        "properties": {
            "task_id": task_id_schema("The ID of the background task"),
            "lines": {
                "type": "integer",
                "description": "Number of recent lines to return (default: 50)"
            }
        },
        "required": ["task_id"]
    }))
    .with_handler(handler)
}

pub fn wait_tool_result_tool(manager: Arc<BackgroundToolManager>) -> LocalTool {
    let handler = handler_fn(move |event, args| {
        let manager = manager.clone();
        async move {
            let params: TaskIdParams = parse(args)?;
            if let Err(e) = validate_task_id(&params.task_id) {
                return Ok(HandlerOutput::text(format!("Error: {e}")));
            }
            let Some(session_id) = resolve_session(&manager, event.as_deref(), &params.task_id)
            else {
                return Ok(not_found(&params.task_id));
            };

            debug!(task_id = %params.task_id, session_id = %session_id, "Waiting for background task");
            match manager.wait_for_task(&params.task_id, &session_id).await {
                WaitOutcome::Finished { report } => Ok(HandlerOutput::text(report)),
                WaitOutcome::Interrupted(interrupted) => Err(HandlerError::Interrupted(interrupted)),
                WaitOutcome::NotFound => Ok(not_found(&params.task_id)),
            }
        }
    })
    .with_parameters(vec![HandlerParam::required("task_id", "str")]);

    LocalTool::new(
        WAIT_TOOL_RESULT,
        "Wait for a background tool to complete. The wait can be interrupted by new user messages. No timeout - waits until task finishes or is terminated.",
    )
    .with_parameters(json!({
        "type": "object",
        "properties": { "task_id": task_id_schema("The ID of the background task") },
        "required": ["task_id"]
    }))
    .with_handler(handler)
}

pub fn stop_tool_tool(manager: Arc<BackgroundToolManager>) -> LocalTool {
    let handler = handler_fn(move |_event, args| {
        let manager = manager.clone();
        async move {
            let params: TaskIdParams = parse(args)?;
            if let Err(e) = validate_task_id(&params.task_id) {
                return Ok(HandlerOutput::text(format!("Error: {e}")));
            }
            let task_id = params.task_id;
            let Some(task) = manager.registry().get(&task_id) else {
                return Ok(not_found(&task_id));
            };
            if task.is_finished() {
                return Ok(HandlerOutput::text(format!(
                    "Task {task_id} has already finished ({}).",
                    task.status()
                )));
            }
            let text = if manager.stop_task(&task_id) {
                info!(task_id = %task_id, "Background task stopped by model");
                format!("Task {task_id} has been stopped.")
            } else {
                format!("Failed to stop task {task_id}.")
            };
            Ok(HandlerOutput::text(text))
        }
    })
    .with_parameters(vec![HandlerParam::required("task_id", "str")]);

    LocalTool::new(STOP_TOOL, "Stop a running background tool.")
        .with_parameters(json!({
            "type": "object",
            "properties": { "task_id": task_id_schema("The ID of the background task to stop") },
            "required": ["task_id"]
        }))
        .with_handler(handler)
}

pub fn list_running_tools_tool(manager: Arc<BackgroundToolManager>) -> LocalTool {
    let handler = handler_fn(move |event, _args| {
        let manager = manager.clone();
        async move {
            let running = event
                .map(|e| manager.list_running_tasks(&e.session_id))
                .unwrap_or_default();
            if running.is_empty() {
                return Ok(HandlerOutput::text(
                    "No background tools are currently running.",
                ));
            }
            let mut lines = vec!["Running background tools:".to_string()];
            lines.extend(
                running
                    .iter()
                    .map(|t| format!("- {}: {} ({})", t.task_id, t.tool_name, t.status)),
            );
            Ok(HandlerOutput::text(lines.join("\n")))
        }
    })
    .with_parameters(Vec::new());

    LocalTool::new(
        LIST_RUNNING_TOOLS,
        "List all currently running background tools in this session.",
    )
    .with_handler(handler)
}

/// Register the four management tools against `manager`.
pub fn register_background_tools(registry: &mut ToolRegistry, manager: &Arc<BackgroundToolManager>) {
    registry.register(get_tool_output_tool(manager.clone()));
    registry.register(wait_tool_result_tool(manager.clone()));
    registry.register(stop_tool_tool(manager.clone()));
    registry.register(list_running_tools_tool(manager.clone()));
    info!("Registered background tool management tools");
}
