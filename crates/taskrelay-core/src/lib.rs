//! TaskRelay Core - timeout-bounded tool execution with background escalation
//!
//! This crate provides:
//! - Tool call orchestration (entry point resolution, parameter checks, timeouts)
//! - Escalation of timed-out calls to supervised background tasks
//! - Background task registry, output capture, cancellation and cleanup
//! - Interrupt-driven waiting and completion callbacks into the event queue
//! - Management tools for inspecting, waiting on, stopping and listing tasks

pub mod background;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod sanitize;
pub mod validation;

// Re-export commonly used types
pub use background::{
    BackgroundTask, BackgroundToolManager, CallbackEventBuilder, CallbackPublisher, CleanupReport,
    OutputBuffer, SubmitRequest, TaskExecutor, TaskNotifier, TaskRegistry, TaskSnapshot,
    TaskStatus, WaitOutcome, register_background_tools,
};
pub use config::{
    BACKGROUND_TOOL_NAMES, BackgroundToolConfig, JsonFileSettings, SettingsSource, StaticSettings,
    TimeoutCache, is_background_tool,
};
pub use error::{Result, ToolExecutionError, ValidationError};
pub use execution::{
    AgentTool, BackgroundHandler, FunctionToolExecutor, RunContext, TimeoutContext, TimeoutHandler,
    TimeoutStrategy, ToolExecutor, ToolResultStream,
};
pub use logging::init_tracing;
