//! Background task executor.
//!
//! Runs one task end to end: start, invoke the handler under the background
//! timeout, record the terminal state, build the notification, publish the
//! callback and release the task's borrowed references.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use taskrelay_traits::{HandlerError, HandlerOutput, ToolHandler};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_ERROR_PREVIEW_MAX_LENGTH, DEFAULT_OUTPUT_LINES, TimeoutCache};
use crate::sanitize::{sanitize_for_log, sanitize_text};

use super::callback::CallbackPublisher;
use super::notifier::TaskNotifier;
use super::output_buffer::OutputBuffer;
use super::task::BackgroundTask;

enum Outcome {
    Finished(Result<Option<String>, HandlerError>),
    Panicked(String),
    TimedOut,
    Cancelled,
}

fn format_secs(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        duration.as_secs().to_string()
    } else {
        format!("{:.1}", duration.as_secs_f64())
    }
}

/// User-facing failure summary; never carries a backtrace.
fn failure_summary(kind: &str, message: &str) -> String {
    sanitize_text(
        &format!("Task failed: {kind}: {message}"),
        DEFAULT_ERROR_PREVIEW_MAX_LENGTH * 4,
    )
}

pub struct TaskExecutor {
    output_buffer: Arc<OutputBuffer>,
    notifier: TaskNotifier,
    publisher: CallbackPublisher,
    timeouts: TimeoutCache,
    output_lines: usize,
    running: DashMap<String, CancellationToken>,
}

impl TaskExecutor {
    pub fn new(output_buffer: Arc<OutputBuffer>, timeouts: TimeoutCache) -> Self {
        Self {
            output_buffer,
            notifier: TaskNotifier::new(),
            publisher: CallbackPublisher::default(),
            timeouts,
            output_lines: DEFAULT_OUTPUT_LINES,
            running: DashMap::new(),
        }
    }

    pub fn with_publisher(mut self, publisher: CallbackPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    /// Lines of recent output included in notifications.
    pub fn with_output_lines(mut self, lines: usize) -> Self {
        self.output_lines = lines.max(1);
        self
    }

    pub fn output_buffer(&self) -> &Arc<OutputBuffer> {
        &self.output_buffer
    }

    /// Register a task as live before it is scheduled, so a `cancel` issued
    /// between submission and first poll is not lost.
    pub fn track(&self, task_id: &str) -> CancellationToken {
        self.running
            .entry(task_id.to_string())
            .or_default()
            .clone()
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.running
            .get(task_id)
            .is_some_and(|token| !token.is_cancelled())
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Request cancellation. Returns `false` if the task is not live or a
    /// cancellation is already pending.
    pub fn cancel(&self, task_id: &str) -> bool {
        // The exclusive shard guard makes check-and-cancel a single step.
        let Some(token) = self.running.get_mut(task_id) else {
            return false;
        };
        if token.is_cancelled() {
            return false;
        }
        token.cancel();
        drop(token);
        info!(task_id = %task_id, "Background task cancellation requested");
        true
    }

    /// Run `task` to a terminal state. Returns the result on success.
    pub async fn execute(
        &self,
        task: Arc<BackgroundTask>,
        handler: Arc<dyn ToolHandler>,
    ) -> Option<String> {
        let task_id = task.task_id().to_string();
        let token = self.track(&task_id);

        // Armed before anything can fail, so the task is never left live.
        let mut cleanup = scopeguard::guard(None::<AbortHandle>, |abort| {
            if let Some(abort) = abort {
                abort.abort();
            }
            if !task.is_finished() {
                warn!(task_id = %task_id, "Background task abandoned before finishing");
                task.cancel();
            }
            self.running.remove(&task_id);
            task.release_references();
        });

        task.start();
        let timeout = self.timeouts.get();

        info!(
            task_id = %task_id,
            tool = %task.tool_name(),
            timeout_secs = %format_secs(timeout),
            "Background task started"
        );

        let mut handle = tokio::spawn(Self::run_handler(
            task.clone(),
            handler,
            self.output_buffer.clone(),
        ));
        *cleanup = Some(handle.abort_handle());

        let raced = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            joined = tokio::time::timeout(timeout, &mut handle) => Some(joined),
        };

        let outcome = match raced {
            None => {
                handle.abort();
                let _ = handle.await;
                Outcome::Cancelled
            }
            Some(Err(_elapsed)) => {
                handle.abort();
                let _ = handle.await;
                Outcome::TimedOut
            }
            Some(Ok(Ok(result))) => Outcome::Finished(result),
            Some(Ok(Err(e))) if e.is_cancelled() => Outcome::Cancelled,
            Some(Ok(Err(e))) => Outcome::Panicked(e.to_string()),
        };

        match outcome {
            Outcome::Finished(Ok(result)) => {
                let result = result.unwrap_or_default();
                task.complete(result.clone());
                self.log(&task, "[END] Task completed");
                info!(task_id = %task_id, "Background task completed");
                self.finalize(&task);
                Some(result)
            }
            Outcome::Finished(Err(e)) if e.is_interrupted() => {
                task.fail(failure_summary(e.kind(), &e.message()));
                self.log(&task, "[INTERRUPTED] Wait interrupted, no callback needed");
                info!(task_id = %task_id, "Background wait interrupted by new activity");
                None
            }
            Outcome::Finished(Err(e)) => {
                self.fail(&task, e.kind(), &e.message(), &format!("{e:?}"));
                None
            }
            Outcome::Panicked(detail) => {
                self.fail(&task, "Panic", "handler panicked", &detail);
                None
            }
            Outcome::TimedOut => {
                let message = format!(
                    "Task timed out after {}s and was terminated.",
                    format_secs(timeout)
                );
                task.fail(message.clone());
                self.log(&task, format!("[TIMEOUT] {message}"));
                info!(task_id = %task_id, "Background task timed out");
                self.finalize(&task);
                None
            }
            Outcome::Cancelled => {
                task.cancel();
                self.log(&task, "[CANCELLED] Task was cancelled");
                info!(task_id = %task_id, "Background task cancelled");
                self.finalize(&task);
                None
            }
        }
    }

    fn fail(&self, task: &BackgroundTask, kind: &str, message: &str, detail: &str) {
        let summary = failure_summary(kind, message);
        debug!(task_id = %task.task_id(), detail, "Background task failure detail");
        warn!(task_id = %task.task_id(), error = %summary, "Background task failed");
        task.fail(summary.clone());
        self.log(task, format!("[ERROR] {summary}"));
        self.finalize(task);
    }

    /// Build the notification from recent output and publish the callback.
    fn finalize(&self, task: &BackgroundTask) {
        let output = self
            .output_buffer
            .get_recent(task.task_id(), self.output_lines)
            .join("\n");
        self.notifier.prepare(task, Some(&output));
        self.publisher.publish(task);
    }

    fn log(&self, task: &BackgroundTask, line: impl Into<String>) {
        log_line(&self.output_buffer, task, line.into());
    }

    async fn run_handler(
        task: Arc<BackgroundTask>,
        handler: Arc<dyn ToolHandler>,
        buffer: Arc<OutputBuffer>,
    ) -> Result<Option<String>, HandlerError> {
        log_line(&buffer, &task, format!("[START] Executing {}", task.tool_name()));
        log_line(
            &buffer,
            &task,
            format!("[ARGS] {}", sanitize_for_log(task.tool_args())),
        );

        let event = if handler.accepts_event() {
            task.event()
        } else {
            None
        };

        match handler.invoke(event, task.tool_args().clone()).await? {
            HandlerOutput::Value(value) => Ok(value.map(|v| v.to_text())),
            HandlerOutput::Stream(mut stream) => {
                let mut last = None;
                while let Some(item) = stream.next().await {
                    if let Some(value) = item? {
                        let text = value.to_text();
                        log_line(&buffer, &task, text.clone());
                        last = Some(text);
                    }
                }
                Ok(last)
            }
        }
    }
}

fn log_line(buffer: &OutputBuffer, task: &BackgroundTask, line: String) {
    debug!(task_id = %task.task_id(), "{line}");
    buffer.append(task.task_id(), line.clone());
    task.append_output(line);
}
