//! Completion callbacks: turning a finished task into a synthetic inbound event.

use serde_json::{Map, Value};
use taskrelay_traits::{AgentEvent, MessageChain};
use tracing::{info, warn};

use crate::config::DEFAULT_ERROR_PREVIEW_MAX_LENGTH;

use super::task::{BackgroundTask, TaskStatus};

pub const EXTRA_IS_CALLBACK: &str = "is_background_task_callback";
pub const EXTRA_TASK_ID: &str = "background_task_id";

const CLOSING_INSTRUCTION: &str =
    "Please inform the user about this task completion and provide any relevant details.";

fn status_text(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Completed => "completed successfully",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "was cancelled",
        TaskStatus::Pending | TaskStatus::Running => "unknown",
    }
}

/// Whether an event was produced by [`CallbackEventBuilder`].
pub fn is_callback_event(event: &AgentEvent) -> bool {
    event
        .extra(EXTRA_IS_CALLBACK)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Builds callback events; never touches a queue.
#[derive(Debug, Clone)]
pub struct CallbackEventBuilder {
    error_preview_max_length: usize,
}

impl Default for CallbackEventBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_PREVIEW_MAX_LENGTH)
    }
}

impl CallbackEventBuilder {
    pub fn new(error_preview_max_length: usize) -> Self {
        Self {
            error_preview_max_length,
        }
    }

    pub fn build_notification_text(&self, task: &BackgroundTask) -> String {
        let mut lines = vec![
            "[Background Task Callback]".to_string(),
            format!("Task ID: {}", task.task_id()),
            format!("Tool: {}", task.tool_name()),
            format!("Status: {}", status_text(task.status())),
        ];

        if let Some(result) = task.result().filter(|r| !r.is_empty()) {
            lines.push(format!("Result: {result}"));
        }

        if let Some(error) = task.error().filter(|e| !e.is_empty()) {
            let mut preview: String = error.chars().take(self.error_preview_max_length).collect();
            if preview.len() < error.len() {
                preview.push_str("...");
            }
            lines.push(format!("Error: {preview}"));
        }

        lines.push(String::new());
        lines.push(CLOSING_INSTRUCTION.to_string());
        lines.join("\n")
    }

    /// Derive the callback event from the event that started the task.
    ///
    /// Platform identity (session, sender, group, self id) is kept; message
    /// content, id, timestamp and extras are replaced.
    pub fn build(&self, task: &BackgroundTask, original: &AgentEvent) -> AgentEvent {
        let text = self.build_notification_text(task);

        let mut extras = Map::new();
        extras.insert(EXTRA_IS_CALLBACK.to_string(), Value::Bool(true));
        extras.insert(
            EXTRA_TASK_ID.to_string(),
            Value::String(task.task_id().to_string()),
        );

        AgentEvent {
            message_id: format!("bg_task_{}", task.task_id()),
            message: MessageChain::plain(text.clone()),
            message_str: text,
            timestamp: chrono::Utc::now().timestamp(),
            is_wake: true,
            is_at_or_wake_command: true,
            extras,
            ..original.clone()
        }
    }

    /// Build from the event stored on the task, if it still has one.
    pub fn build_callback_event(&self, task: &BackgroundTask) -> Option<AgentEvent> {
        let Some(original) = task.event() else {
            warn!(task_id = %task.task_id(), "Task has no event, cannot build callback");
            return None;
        };
        Some(self.build(task, &original))
    }
}

/// Pushes callback events onto the task's event queue.
#[derive(Debug, Clone, Default)]
pub struct CallbackPublisher {
    builder: CallbackEventBuilder,
}

impl CallbackPublisher {
    pub fn new(builder: CallbackEventBuilder) -> Self {
        Self { builder }
    }

    pub fn builder(&self) -> &CallbackEventBuilder {
        &self.builder
    }

    pub fn should_publish(&self, task: &BackgroundTask) -> bool {
        let task_id = task.task_id();
        if task.is_callback_suppressed() {
            info!(task_id = %task_id, "Task was being waited, skipping callback");
            return false;
        }
        if task.is_notification_sent() {
            return false;
        }
        if task.event().is_none() {
            warn!(task_id = %task_id, "Task has no event, skipping callback");
            return false;
        }
        if task.event_queue().is_none() {
            warn!(task_id = %task_id, "Task has no event queue, skipping callback");
            return false;
        }
        if task.notification_message().is_none() {
            warn!(task_id = %task_id, "Task has no notification, skipping callback");
            return false;
        }
        true
    }

    /// Publish the callback. Returns `true` only if it was queued.
    pub fn publish(&self, task: &BackgroundTask) -> bool {
        if !self.should_publish(task) {
            return false;
        }
        let (Some(queue), Some(event)) = (task.event_queue(), self.builder.build_callback_event(task))
        else {
            return false;
        };

        if let Err(e) = queue.put_nowait(event) {
            warn!(task_id = %task.task_id(), error = %e, "Failed to queue callback");
            return false;
        }
        task.mark_notification_sent();
        info!(task_id = %task.task_id(), "Task callback queued");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use taskrelay_traits::{ToolArgs, event_queue};

    fn original_event() -> AgentEvent {
        let mut event = AgentEvent::new("telegram", "telegram:private:7", "crawl it")
            .with_sender("7", Some("ada".into()))
            .with_message_id("m-1");
        event.set_extra("stale", Value::from(1));
        event
    }

    fn finished_task(result: Option<&str>, error: Option<&str>) -> BackgroundTask {
        let task = BackgroundTask::with_id("abc", "crawler", ToolArgs::new(), "telegram:private:7");
        task.start();
        match (result, error) {
            (Some(r), _) => task.complete(r),
            (None, Some(e)) => task.fail(e),
            (None, None) => task.cancel(),
        };
        task
    }

    #[test]
    fn test_completed_text() {
        let text = CallbackEventBuilder::default()
            .build_notification_text(&finished_task(Some("X"), None));
        assert_eq!(
            text,
            "[Background Task Callback]\nTask ID: abc\nTool: crawler\nStatus: completed successfully\nResult: X\n\nPlease inform the user about this task completion and provide any relevant details."
        );
    }

    #[test]
    fn test_error_preview_truncated() {
        let error = "e".repeat(1000);
        let text = CallbackEventBuilder::new(100)
            .build_notification_text(&finished_task(None, Some(&error)));
        assert!(text.contains("Status: failed"));
        assert!(text.contains(&format!("Error: {}...", "e".repeat(100))));
        assert!(text.len() < error.len());
    }

    #[test]
    fn test_cancelled_status_text() {
        let text = CallbackEventBuilder::default().build_notification_text(&finished_task(None, None));
        assert!(text.contains("Status: was cancelled"));
    }

    #[test]
    fn test_build_event_resets_and_marks() {
        let original = original_event();
        let event = CallbackEventBuilder::default().build(&finished_task(Some("X"), None), &original);

        assert_eq!(event.session_id, original.session_id);
        assert_eq!(event.sender, original.sender);
        assert_eq!(event.message_id, "bg_task_abc");
        assert!(event.is_wake);
        assert!(event.is_at_or_wake_command);
        assert!(event.message_str.contains("Result: X"));
        assert_eq!(event.message.plain_text(), event.message_str);
        assert!(is_callback_event(&event));
        assert_eq!(event.extra(EXTRA_TASK_ID), Some(&Value::from("abc")));
        assert!(event.extra("stale").is_none());
        assert!(!is_callback_event(&original));
    }

    #[tokio::test]
    async fn test_publish_queues_once() {
        let (queue, mut rx) = event_queue();
        let task = finished_task(Some("X"), None)
            .with_event(Arc::new(original_event()))
            .with_event_queue(&queue);
        task.set_notification_message("done");

        let publisher = CallbackPublisher::default();
        assert!(publisher.publish(&task));
        assert!(task.is_notification_sent());
        assert!(!publisher.publish(&task));

        let event = rx.recv().await.expect("callback queued");
        assert_eq!(event.message_id, "bg_task_abc");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_skipped_when_waited_at_finish() {
        let (queue, _rx) = event_queue();
        let task = BackgroundTask::with_id("abc", "crawler", ToolArgs::new(), "telegram:private:7")
            .with_event(Arc::new(original_event()))
            .with_event_queue(&queue);
        task.start();
        assert!(task.add_waiter());
        task.complete("X");
        // The waiter has already left by the time the executor publishes.
        task.remove_waiter();
        task.set_notification_message("done");

        assert!(!CallbackPublisher::default().publish(&task));
        assert!(!task.is_notification_sent());
    }

    #[test]
    fn test_publish_requires_event_queue_and_message() {
        let publisher = CallbackPublisher::default();
        let task = finished_task(Some("X"), None).with_event(Arc::new(original_event()));
        task.set_notification_message("done");
        assert!(!publisher.should_publish(&task));

        let (queue, _rx) = event_queue();
        let task = finished_task(Some("X"), None)
            .with_event(Arc::new(original_event()))
            .with_event_queue(&queue);
        assert!(!publisher.should_publish(&task));
    }

    #[test]
    fn test_publish_to_closed_queue_leaves_unsent() {
        let (queue, rx) = event_queue();
        drop(rx);
        let task = finished_task(Some("X"), None)
            .with_event(Arc::new(original_event()))
            .with_event_queue(&queue);
        task.set_notification_message("done");
        assert!(!CallbackPublisher::default().publish(&task));
        assert!(!task.is_notification_sent());
    }
}
