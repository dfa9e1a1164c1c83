//! Completion notifications for background tasks.
//!
//! `TaskNotifier` renders the notification body stored on a finished task and
//! can push it through any [`NotificationSink`]. The asynchronous callback path
//! (see [`super::callback`]) and direct waiters both read the same body.

use anyhow::Result;
use async_trait::async_trait;

use super::formatter::build_task_result;
use super::task::BackgroundTask;

/// Destination for a rendered notification.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, task_id: &str, message: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TaskNotifier;

impl TaskNotifier {
    pub fn new() -> Self {
        Self
    }

    /// A task is notified once, after it finishes.
    pub fn should_notify(&self, task: &BackgroundTask) -> bool {
        task.is_finished() && !task.is_notification_sent()
    }

    pub fn build_message(&self, task: &BackgroundTask, output: Option<&str>) -> String {
        build_task_result(task, output)
    }

    /// Store the notification body on the task unless one is already there.
    /// Returns the stored body.
    pub fn prepare(&self, task: &BackgroundTask, output: Option<&str>) -> String {
        if let Some(existing) = task.notification_message() {
            return existing;
        }
        let message = self.build_message(task, output);
        task.set_notification_message(message.clone());
        task.notification_message().unwrap_or(message)
    }

    /// Deliver the notification through `sink` and mark it sent.
    ///
    /// Returns `Ok(false)` when the task is unfinished or was already notified.
    pub async fn notify_completion(
        &self,
        task: &BackgroundTask,
        sink: &dyn NotificationSink,
    ) -> Result<bool> {
        if !self.should_notify(task) {
            return Ok(false);
        }
        let message = self.prepare(task, None);
        sink.send(task.task_id(), &message).await?;
        Ok(task.mark_notification_sent())
    }
}
