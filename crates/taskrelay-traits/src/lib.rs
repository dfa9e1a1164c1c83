//! TaskRelay Traits - contracts between the execution core and its collaborators.
//!
//! This crate provides the shared interfaces used across the TaskRelay workspace:
//! - ToolHandler, HandlerOutput, ToolValue and the invocation stream
//! - FunctionTool, LocalTool, RemoteTool, HandoffTool, ToolRegistry
//! - AgentEvent and MessageChain
//! - EventQueue and DirectSender sinks

pub mod error;
pub mod event;
pub mod handler;
pub mod queue;
pub mod registry;
pub mod tool;

// ── Top-level re-exports ─────────────────────────────────────────────

// Error types
pub use error::{HandlerError, QueueError, Result as HandlerResult, WaitInterrupted};

// Events
pub use event::{AgentEvent, EventSender, MessageChain, MessageComponent, MessageType};

// Handler contract
pub use handler::{
    FnHandler, HandlerOutput, HandlerParam, HandlerStream, ToolArgs, ToolHandler, ToolValue,
    handler_fn, invoke_stream,
};

// Tools and registry
pub use registry::ToolRegistry;
pub use tool::{
    CallToolResult, FunctionTool, HandoffRequest, HandoffTool, LocalTool, RemoteTool,
    SubAgentRunner, ToolContent, ToolSchema,
};

// Sinks
pub use queue::{DirectSender, EventQueue, event_queue};
