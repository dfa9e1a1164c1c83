//! Background task management
//!
//! A tool call that outlives its timeout is handed to the
//! [`BackgroundToolManager`], which keeps it running detached from the
//! conversation turn:
//!
//! - [`TaskRegistry`] indexes tasks by id and by session
//! - [`OutputBuffer`] keeps a bounded tail of each task's output
//! - [`TaskExecutor`] runs the handler under the background timeout and honours cancellation
//! - [`TaskNotifier`] and [`CallbackPublisher`] report completion back to the conversation
//!
//! The model drives tasks through the tools in [`tools`].

mod callback;
mod executor;
mod formatter;
mod manager;
mod notifier;
mod output_buffer;
mod registry;
mod signal;
mod task;
pub mod tools;

pub use callback::{
    CallbackEventBuilder, CallbackPublisher, EXTRA_IS_CALLBACK, EXTRA_TASK_ID, is_callback_event,
};
pub use executor::TaskExecutor;
pub use formatter::build_task_result;
pub use manager::{
    BackgroundToolManager, CleanupReport, PendingNotification, SubmitRequest, WaitOutcome,
};
pub use notifier::{NotificationSink, TaskNotifier};
pub use output_buffer::OutputBuffer;
pub use registry::TaskRegistry;
pub use signal::CompletionSignal;
pub use task::{BackgroundTask, CANCELLED_ERROR, TaskSnapshot, TaskStatus};
pub use tools::register_background_tools;
