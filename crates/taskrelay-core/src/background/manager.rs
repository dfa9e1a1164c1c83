//! Background tool manager: the façade over registry, buffers and executor.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use taskrelay_traits::{AgentEvent, EventQueue, ToolArgs, ToolHandler, WaitInterrupted};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{BackgroundToolConfig, SettingsSource, StaticSettings, TimeoutCache};
use crate::error::{Result, ToolExecutionError};
use crate::validation::validate_session_id;

use super::callback::{CallbackEventBuilder, CallbackPublisher};
use super::executor::TaskExecutor;
use super::formatter::build_task_result;
use super::output_buffer::OutputBuffer;
use super::registry::TaskRegistry;
use super::task::{BackgroundTask, TaskSnapshot, TaskStatus};

/// Everything needed to start a background task.
pub struct SubmitRequest {
    pub tool_name: String,
    pub tool_args: ToolArgs,
    pub session_id: String,
    pub handler: Arc<dyn ToolHandler>,
    /// Await the execution inline instead of detaching it.
    pub wait: bool,
    pub event: Option<Arc<AgentEvent>>,
    pub event_queue: Option<Arc<dyn EventQueue>>,
}

impl SubmitRequest {
    pub fn new(
        tool_name: impl Into<String>,
        tool_args: ToolArgs,
        session_id: impl Into<String>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_args,
            session_id: session_id.into(),
            handler,
            wait: true,
            event: None,
            event_queue: None,
        }
    }

    pub fn detached(mut self) -> Self {
        self.wait = false;
        self
    }

    pub fn with_event(mut self, event: Arc<AgentEvent>) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_event_queue(mut self, queue: Arc<dyn EventQueue>) -> Self {
        self.event_queue = Some(queue);
        self
    }
}

/// A finished task whose notification has not been delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingNotification {
    pub task_id: String,
    pub tool_name: String,
    pub status: TaskStatus,
    pub message: String,
}

/// What one cleanup pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub tasks_removed: usize,
    pub buffers_removed: usize,
    pub flags_removed: usize,
}

/// How an interruptible wait ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// The task reached a terminal state; `report` is its formatted result.
    Finished { report: String },
    /// New activity arrived for the session. The task keeps running.
    Interrupted(WaitInterrupted),
    NotFound,
}

/// Entry point for background task management.
///
/// Construct once per process and share the `Arc`.
pub struct BackgroundToolManager {
    config: BackgroundToolConfig,
    registry: Arc<TaskRegistry>,
    output_buffer: Arc<OutputBuffer>,
    executor: Arc<TaskExecutor>,
    interrupt_flags: DashSet<String>,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundToolManager {
    pub fn new(config: BackgroundToolConfig, settings: Arc<dyn SettingsSource>) -> Arc<Self> {
        let output_buffer = Arc::new(OutputBuffer::new(config.output_buffer_lines));
        let timeouts = TimeoutCache::new(
            settings,
            config.task_timeout(),
            config.timeout_cache_ttl(),
        );
        let publisher =
            CallbackPublisher::new(CallbackEventBuilder::new(config.error_preview_max_length));
        let executor = TaskExecutor::new(output_buffer.clone(), timeouts)
            .with_publisher(publisher)
            .with_output_lines(config.default_output_lines);

        Arc::new(Self {
            config,
            registry: Arc::new(TaskRegistry::new()),
            output_buffer,
            executor: Arc::new(executor),
            interrupt_flags: DashSet::new(),
            cleanup_handle: Mutex::new(None),
        })
    }

    /// Manager with default configuration and no external settings.
    pub fn with_defaults() -> Arc<Self> {
        Self::new(BackgroundToolConfig::default(), Arc::new(StaticSettings::new()))
    }

    pub fn config(&self) -> &BackgroundToolConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn output_buffer(&self) -> &Arc<OutputBuffer> {
        &self.output_buffer
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    /// Register and run a task. Returns its id once registered (and, when
    /// `request.wait` is set, once it has finished).
    pub async fn submit_task(self: &Arc<Self>, request: SubmitRequest) -> Result<String> {
        validate_session_id(&request.session_id)
            .map_err(|e| ToolExecutionError::BackgroundTask(e.to_string()))?;

        self.ensure_cleanup_loop();

        let mut task_id = BackgroundTask::generate_id();
        while self.registry.contains(&task_id) {
            task_id = BackgroundTask::generate_id();
        }

        let mut task = BackgroundTask::with_id(
            task_id,
            request.tool_name,
            request.tool_args,
            request.session_id,
        );
        if let Some(event) = request.event {
            task = task.with_event(event);
        }
        if let Some(queue) = &request.event_queue {
            task = task.with_event_queue(queue);
        }
        let task = Arc::new(task);

        let task_id = self.registry.register(task.clone());
        // Live before scheduling, so an immediate stop_task is honoured.
        self.executor.track(&task_id);
        info!(
            task_id = %task_id,
            tool = %task.tool_name(),
            session_id = %task.session_id(),
            detached = !request.wait,
            "Background task submitted"
        );

        if request.wait {
            self.executor.execute(task, request.handler).await;
        } else {
            let executor = self.executor.clone();
            let handler = request.handler;
            tokio::spawn(async move {
                executor.execute(task, handler).await;
            });
        }
        Ok(task_id)
    }

    /// Most recent `lines` lines of a task's output, newline-joined.
    pub fn get_task_output(&self, task_id: &str, lines: usize) -> String {
        self.output_buffer.get_recent(task_id, lines).join("\n")
    }

    /// Wait for a task's result, up to `timeout` (default: configured wait
    /// timeout). `None` if the task is unknown, did not finish in time, or
    /// finished without a result.
    pub async fn wait_task_result(
        &self,
        task_id: &str,
        timeout: Option<Duration>,
    ) -> Option<String> {
        let task = self.registry.get(task_id)?;
        let timeout = timeout.unwrap_or_else(|| self.config.wait_timeout());
        if let Some(signal) = task.completion_signal()
            && !signal.wait(Some(timeout)).await
        {
            debug!(task_id = %task_id, "Wait for task result timed out");
            return None;
        }
        task.result()
    }

    /// Wait until the task finishes or new activity arrives for `session_id`.
    ///
    /// Interruption never affects the task itself.
    pub async fn wait_for_task(&self, task_id: &str, session_id: &str) -> WaitOutcome {
        let Some(task) = self.registry.get(task_id) else {
            return WaitOutcome::NotFound;
        };
        if task.add_waiter() {
            let waiting = scopeguard::guard(task.clone(), |task| {
                task.remove_waiter();
            });
            self.clear_interrupt_flag(session_id);
            let poll = self.config.wait_poll_interval();

            loop {
                if self.interrupt_flags.remove(session_id).is_some() {
                    // A task that finished while we were registered published
                    // no callback, so the result must still be reported here.
                    let finished = scopeguard::ScopeGuard::into_inner(waiting).remove_waiter();
                    if finished {
                        break;
                    }
                    info!(task_id = %task_id, session_id = %session_id, "Wait interrupted by new activity");
                    return WaitOutcome::Interrupted(WaitInterrupted::new(task_id, session_id));
                }
                // A missing signal means the task already finished.
                let Some(signal) = task.completion_signal() else {
                    break;
                };
                signal.wait(Some(poll)).await;
            }
            self.clear_interrupt_flag(session_id);
        }

        let output = self.get_task_output(task_id, self.config.default_output_lines);
        WaitOutcome::Finished {
            report: build_task_result(&task, Some(&output)),
        }
    }

    pub fn stop_task(&self, task_id: &str) -> bool {
        self.executor.cancel(task_id)
    }

    pub fn list_running_tasks(&self, session_id: &str) -> Vec<TaskSnapshot> {
        self.registry
            .get_running_tasks(session_id)
            .iter()
            .map(|t| t.snapshot())
            .collect()
    }

    pub fn get_task_status(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.registry.get(task_id).map(|t| t.snapshot())
    }

    pub fn get_pending_notifications(&self, session_id: &str) -> Vec<PendingNotification> {
        self.registry
            .get_by_session(session_id)
            .iter()
            .filter(|t| !t.is_notification_sent())
            .filter_map(|t| {
                Some(PendingNotification {
                    task_id: t.task_id().to_string(),
                    tool_name: t.tool_name().to_string(),
                    status: t.status(),
                    message: t.notification_message()?,
                })
            })
            .collect()
    }

    pub fn mark_notification_sent(&self, task_id: &str) -> bool {
        self.registry
            .get(task_id)
            .is_some_and(|t| t.mark_notification_sent())
    }

    /// Record new activity for a session, aborting any wait in it.
    pub fn set_interrupt_flag(&self, session_id: &str) {
        self.interrupt_flags.insert(session_id.to_string());
    }

    pub fn check_interrupt_flag(&self, session_id: &str) -> bool {
        self.interrupt_flags.contains(session_id)
    }

    pub fn clear_interrupt_flag(&self, session_id: &str) {
        self.interrupt_flags.remove(session_id);
    }

    /// Status block describing a session's unfinished tasks, if any.
    pub fn get_running_tasks_status(&self, session_id: &str) -> Option<String> {
        let running = self.registry.get_running_tasks(session_id);
        if running.is_empty() {
            return None;
        }
        let mut lines = vec!["[Background Tasks Status]".to_string()];
        lines.extend(running.iter().map(|t| {
            format!("- Task {}: {} ({})", t.task_id(), t.tool_name(), t.status())
        }));
        lines.push(
            "Note: These tasks are running in the background and will notify you when complete."
                .to_string(),
        );
        Some(lines.join("\n"))
    }

    /// One cleanup pass: expired tasks, orphaned buffers, stale interrupt flags.
    pub fn run_cleanup(&self) -> CleanupReport {
        let tasks_removed = self
            .registry
            .cleanup_finished_tasks(self.config.task_max_age());
        let buffers_removed = self
            .output_buffer
            .cleanup_old_buffers(&self.registry.task_ids());

        let sessions = self.registry.session_ids();
        let before = self.interrupt_flags.len();
        self.interrupt_flags.retain(|session| sessions.contains(session));
        let flags_removed = before.saturating_sub(self.interrupt_flags.len());

        let report = CleanupReport {
            tasks_removed,
            buffers_removed,
            flags_removed,
        };
        if report != CleanupReport::default() {
            info!(
                tasks_removed,
                buffers_removed,
                flags_removed,
                remaining = self.registry.count(),
                "Background task cleanup"
            );
        }
        report
    }

    /// Start the periodic cleanup loop unless it is already running.
    pub fn ensure_cleanup_loop(self: &Arc<Self>) {
        let mut slot = self.cleanup_handle.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No Tokio runtime found for background task cleanup");
            return;
        };

        let manager: Weak<Self> = Arc::downgrade(self);
        let period = self.config.cleanup_interval();
        *slot = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            debug!(interval_secs = period.as_secs(), "Background task cleanup loop started");
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.run_cleanup();
            }
        }));
    }

    pub fn is_cleanup_running(&self) -> bool {
        self.cleanup_handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn stop_cleanup_loop(&self) {
        if let Some(handle) = self.cleanup_handle.lock().take() {
            handle.abort();
            debug!("Background task cleanup loop stopped");
        }
    }
}

impl Drop for BackgroundToolManager {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_handle.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskrelay_traits::{HandlerOutput, ToolValue, handler_fn};

    fn fast_config() -> BackgroundToolConfig {
        BackgroundToolConfig {
            wait_poll_interval_ms: 20,
            ..Default::default()
        }
    }

    fn manager() -> Arc<BackgroundToolManager> {
        BackgroundToolManager::new(fast_config(), Arc::new(StaticSettings::new()))
    }

    fn instant_handler(text: &'static str) -> Arc<dyn ToolHandler> {
        Arc::new(handler_fn(move |_event, _args| async move {
            Ok(HandlerOutput::text(text))
        }))
    }

    fn sleeping_handler(secs: u64) -> Arc<dyn ToolHandler> {
        Arc::new(handler_fn(move |_event, _args| async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            Ok(HandlerOutput::text("slept"))
        }))
    }

    #[tokio::test]
    async fn test_submit_wait_completes_inline() {
        let manager = manager();
        let task_id = manager
            .submit_task(SubmitRequest::new("echo", ToolArgs::new(), "s1", instant_handler("hi")))
            .await
            .expect("submit should succeed");

        let status = manager.get_task_status(&task_id).expect("task registered");
        assert_eq!(status.status, TaskStatus::Completed);
        assert_eq!(status.result.as_deref(), Some("hi"));
        assert!(manager.is_cleanup_running());
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_session() {
        let manager = manager();
        let err = manager
            .submit_task(SubmitRequest::new("echo", ToolArgs::new(), "", instant_handler("x")))
            .await
            .expect_err("empty session should be rejected");
        assert!(matches!(err, ToolExecutionError::BackgroundTask(_)));
    }

    #[tokio::test]
    async fn test_immediate_stop_cancels() {
        let manager = manager();
        let task_id = manager
            .submit_task(
                SubmitRequest::new("slow", ToolArgs::new(), "s1", instant_handler("done"))
                    .detached(),
            )
            .await
            .expect("submit should succeed");

        assert!(manager.stop_task(&task_id));
        assert!(!manager.stop_task(&task_id));

        let result = manager
            .wait_task_result(&task_id, Some(Duration::from_secs(5)))
            .await;
        assert!(result.is_none());
        let status = manager.get_task_status(&task_id).expect("task registered");
        assert_eq!(status.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_wait_task_result_returns_result() {
        let manager = manager();
        let task_id = manager
            .submit_task(
                SubmitRequest::new("echo", ToolArgs::new(), "s1", instant_handler("value"))
                    .detached(),
            )
            .await
            .expect("submit should succeed");

        let result = manager
            .wait_task_result(&task_id, Some(Duration::from_secs(5)))
            .await;
        assert_eq!(result.as_deref(), Some("value"));
        assert!(manager.wait_task_result("missing", None).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_task_result_times_out() {
        let manager = manager();
        let task_id = manager
            .submit_task(
                SubmitRequest::new("slow", ToolArgs::new(), "s1", sleeping_handler(100))
                    .detached(),
            )
            .await
            .expect("submit should succeed");

        let result = manager
            .wait_task_result(&task_id, Some(Duration::from_secs(1)))
            .await;
        assert!(result.is_none());
        assert!(manager.stop_task(&task_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_task_interrupted_leaves_task_running() {
        let manager = manager();
        let task_id = manager
            .submit_task(
                SubmitRequest::new("slow", ToolArgs::new(), "s1", sleeping_handler(30))
                    .detached(),
            )
            .await
            .expect("submit should succeed");

        let waiter = {
            let manager = manager.clone();
            let task_id = task_id.clone();
            tokio::spawn(async move { manager.wait_for_task(&task_id, "s1").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.registry().get(&task_id).is_some_and(|t| t.is_being_waited()));

        manager.set_interrupt_flag("s1");
        let outcome = waiter.await.expect("waiter should not panic");
        assert_eq!(
            outcome,
            WaitOutcome::Interrupted(WaitInterrupted::new(task_id.clone(), "s1"))
        );
        assert!(!manager.check_interrupt_flag("s1"));

        let task = manager.registry().get(&task_id).expect("task registered");
        assert_eq!(task.status(), TaskStatus::Running);
        assert!(!task.is_being_waited());
        manager.stop_task(&task_id);
    }

    #[tokio::test]
    async fn test_wait_for_task_finished() {
        let manager = manager();
        let task_id = manager
            .submit_task(
                SubmitRequest::new("echo", ToolArgs::new(), "s1", instant_handler("result-X"))
                    .detached(),
            )
            .await
            .expect("submit should succeed");

        match manager.wait_for_task(&task_id, "s1").await {
            WaitOutcome::Finished { report } => {
                assert!(report.contains("[FINAL RESULT]\nresult-X"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            manager.wait_for_task("nope", "s1").await,
            WaitOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_stale_flag_cleared_at_wait_start() {
        let manager = manager();
        let task_id = manager
            .submit_task(
                SubmitRequest::new("echo", ToolArgs::new(), "s1", sleeping_handler(0))
                    .detached(),
            )
            .await
            .expect("submit should succeed");
        manager.set_interrupt_flag("s1");

        let outcome = manager.wait_for_task(&task_id, "s1").await;
        assert!(matches!(outcome, WaitOutcome::Finished { .. }));
    }

    #[tokio::test]
    async fn test_pending_notifications_and_mark_sent() {
        let manager = manager();
        let task_id = manager
            .submit_task(SubmitRequest::new("echo", ToolArgs::new(), "s1", instant_handler("x")))
            .await
            .expect("submit should succeed");

        // No event queue, so the callback could not be published.
        let pending = manager.get_pending_notifications("s1");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_id, task_id);
        assert_eq!(pending[0].status, TaskStatus::Completed);

        assert!(manager.mark_notification_sent(&task_id));
        assert!(manager.get_pending_notifications("s1").is_empty());
        assert!(!manager.mark_notification_sent("missing"));
    }

    #[tokio::test]
    async fn test_running_tasks_status_text() {
        let manager = manager();
        assert!(manager.get_running_tasks_status("s1").is_none());

        let task_id = manager
            .submit_task(
                SubmitRequest::new("crawler", ToolArgs::new(), "s1", sleeping_handler(30))
                    .detached(),
            )
            .await
            .expect("submit should succeed");

        let status = manager
            .get_running_tasks_status("s1")
            .expect("one task running");
        assert!(status.starts_with("[Background Tasks Status]\n"));
        assert!(status.contains(&format!("- Task {task_id}: crawler (")));
        assert!(status.ends_with("will notify you when complete."));
        assert_eq!(manager.list_running_tasks("s1").len(), 1);
        manager.stop_task(&task_id);
    }

    #[tokio::test]
    async fn test_run_cleanup() {
        let config = BackgroundToolConfig {
            task_max_age_secs: 0,
            ..fast_config()
        };
        let manager = BackgroundToolManager::new(config, Arc::new(StaticSettings::new()));
        let task_id = manager
            .submit_task(SubmitRequest::new("echo", ToolArgs::new(), "s1", instant_handler("x")))
            .await
            .expect("submit should succeed");
        manager.output_buffer().append("orphan", "line");
        manager.set_interrupt_flag("s1");
        manager.set_interrupt_flag("ghost-session");

        let report = manager.run_cleanup();
        assert_eq!(report.tasks_removed, 1);
        assert_eq!(report.buffers_removed, 2);
        assert_eq!(report.flags_removed, 2);
        assert!(manager.get_task_status(&task_id).is_none());
        assert_eq!(manager.get_task_output(&task_id, 10), "");
    }

    #[tokio::test]
    async fn test_task_output_lines() {
        let manager = manager();
        let handler: Arc<dyn ToolHandler> = Arc::new(handler_fn(|_event, _args| async {
            Ok(HandlerOutput::stream(futures::stream::iter(
                (0..5).map(|i| Ok(Some(ToolValue::Text(format!("step {i}"))))),
            )))
        }));
        let task_id = manager
            .submit_task(SubmitRequest::new(
                "steps",
                json!({ "n": 5 }).as_object().cloned().unwrap_or_default(),
                "s1",
                handler,
            ))
            .await
            .expect("submit should succeed");

        let output = manager.get_task_output(&task_id, 3);
        assert_eq!(output.lines().count(), 3);
        assert!(output.ends_with("[END] Task completed"));
    }
}
