//! Background task state.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use taskrelay_traits::{AgentEvent, EventQueue, ToolArgs};

use super::signal::CompletionSignal;

/// Error recorded on a task that was cancelled.
pub const CANCELLED_ERROR: &str = "Task was cancelled";

/// Lifecycle of a background task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable view of a task at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub tool_name: String,
    pub tool_args: ToolArgs,
    pub session_id: String,
    pub status: TaskStatus,
    /// Wall-clock creation time, unix milliseconds.
    pub created_at: i64,
    /// Time since start, frozen once finished.
    pub runtime_ms: Option<u64>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub output_log_count: usize,
}

#[derive(Default)]
struct TaskState {
    status: TaskStatus,
    started_at: Option<Instant>,
    completed_at: Option<Instant>,
    result: Option<String>,
    error: Option<String>,
    output_log: Vec<String>,
    notification_message: Option<String>,
    notification_sent: bool,
    waiters: usize,
    callback_suppressed: bool,
    completion: Option<Arc<CompletionSignal>>,
    event: Option<Arc<AgentEvent>>,
    event_queue: Option<Weak<dyn EventQueue>>,
}

/// A unit of background work.
///
/// Identity fields are immutable; everything else sits behind one lock so
/// status, outcome and timestamps always change together.
pub struct BackgroundTask {
    task_id: String,
    tool_name: String,
    tool_args: ToolArgs,
    session_id: String,
    created_at_ms: i64,
    created_instant: Instant,
    state: Mutex<TaskState>,
}

impl BackgroundTask {
    pub fn new(
        tool_name: impl Into<String>,
        tool_args: ToolArgs,
        session_id: impl Into<String>,
    ) -> Self {
        Self::with_id(Self::generate_id(), tool_name, tool_args, session_id)
    }

    pub fn with_id(
        task_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_args: ToolArgs,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            tool_name: tool_name.into(),
            tool_args,
            session_id: session_id.into(),
            created_at_ms: chrono::Utc::now().timestamp_millis(),
            created_instant: Instant::now(),
            state: Mutex::new(TaskState::default()),
        }
    }

    /// Short random id, easy for a model to quote back.
    pub fn generate_id() -> String {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(8);
        id
    }

    /// Keep the triggering event until the notification has fired.
    pub fn with_event(mut self, event: Arc<AgentEvent>) -> Self {
        self.state.get_mut().event = Some(event);
        self
    }

    /// Remember where to publish the completion callback without owning the queue.
    pub fn with_event_queue(mut self, queue: &Arc<dyn EventQueue>) -> Self {
        self.state.get_mut().event_queue = Some(Arc::downgrade(queue));
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn tool_args(&self) -> &ToolArgs {
        &self.tool_args
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    pub fn age(&self) -> Duration {
        self.created_instant.elapsed()
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn result(&self) -> Option<String> {
        self.state.lock().result.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.state.lock().started_at
    }

    pub fn completed_at(&self) -> Option<Instant> {
        self.state.lock().completed_at
    }

    /// Time since the task finished, if it has.
    pub fn finished_age(&self) -> Option<Duration> {
        self.state.lock().completed_at.map(|at| at.elapsed())
    }

    /// Pending → Running. Returns `false` from any other state.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock();
        if state.status != TaskStatus::Pending {
            return false;
        }
        state.status = TaskStatus::Running;
        state.started_at = Some(Instant::now());
        true
    }

    pub fn complete(&self, result: impl Into<String>) -> bool {
        self.finish(TaskStatus::Completed, Some(result.into()), None)
    }

    pub fn fail(&self, error: impl Into<String>) -> bool {
        self.finish(TaskStatus::Failed, None, Some(error.into()))
    }

    pub fn cancel(&self) -> bool {
        self.finish(TaskStatus::Cancelled, None, Some(CANCELLED_ERROR.to_string()))
    }

    /// Move to a terminal state once; later calls are refused.
    fn finish(&self, status: TaskStatus, result: Option<String>, error: Option<String>) -> bool {
        let signal = {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return false;
            }
            state.status = status;
            state.completed_at = Some(Instant::now());
            // Decided here so a waiter leaving right after the wake-up
            // cannot re-enable the callback.
            state.callback_suppressed = state.waiters > 0;
            state.result = result;
            state.error = error;
            state.completion.clone()
        };
        if let Some(signal) = signal {
            signal.set();
        }
        true
    }

    pub fn append_output(&self, line: impl Into<String>) {
        self.state.lock().output_log.push(line.into());
    }

    pub fn output_log_count(&self) -> usize {
        self.state.lock().output_log.len()
    }

    pub fn notification_message(&self) -> Option<String> {
        self.state.lock().notification_message.clone()
    }

    /// Store the notification text. Only the first call takes effect.
    pub fn set_notification_message(&self, message: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        if state.notification_message.is_some() {
            return false;
        }
        state.notification_message = Some(message.into());
        true
    }

    pub fn is_notification_sent(&self) -> bool {
        self.state.lock().notification_sent
    }

    /// Flag the notification as delivered. Requires a message; only the
    /// first call returns `true`.
    pub fn mark_notification_sent(&self) -> bool {
        let mut state = self.state.lock();
        if state.notification_sent || state.notification_message.is_none() {
            return false;
        }
        state.notification_sent = true;
        true
    }

    pub fn is_being_waited(&self) -> bool {
        self.state.lock().waiters > 0
    }

    /// Register a waiter. Refused once the task has finished.
    pub fn add_waiter(&self) -> bool {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return false;
        }
        state.waiters += 1;
        true
    }

    /// Whether a waiter was present when the task finished. The waiter
    /// delivers the result, so no callback is published.
    pub fn is_callback_suppressed(&self) -> bool {
        self.state.lock().callback_suppressed
    }

    /// Deregister a waiter. Returns whether the task had already finished.
    pub fn remove_waiter(&self) -> bool {
        let mut state = self.state.lock();
        state.waiters = state.waiters.saturating_sub(1);
        state.status.is_terminal()
    }

    /// Signal fired when the task finishes, or `None` if it already has.
    ///
    /// Checked and created under the state lock, so a waiter that receives a
    /// signal is guaranteed to see it set.
    pub fn completion_signal(&self) -> Option<Arc<CompletionSignal>> {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return None;
        }
        Some(
            state
                .completion
                .get_or_insert_with(|| Arc::new(CompletionSignal::new()))
                .clone(),
        )
    }

    pub fn event(&self) -> Option<Arc<AgentEvent>> {
        self.state.lock().event.clone()
    }

    /// The destination queue, if it is still alive.
    pub fn event_queue(&self) -> Option<Arc<dyn EventQueue>> {
        self.state
            .lock()
            .event_queue
            .as_ref()
            .and_then(|queue| queue.upgrade())
    }

    /// Drop the event, queue, completion signal and in-memory log.
    pub fn release_references(&self) {
        let mut state = self.state.lock();
        state.event = None;
        state.event_queue = None;
        state.completion = None;
        state.output_log = Vec::new();
    }

    pub fn has_references(&self) -> bool {
        let state = self.state.lock();
        state.event.is_some() || state.event_queue.is_some() || state.completion.is_some()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.state.lock();
        let runtime_ms = state.started_at.map(|started| {
            let end = state.completed_at.unwrap_or_else(Instant::now);
            end.saturating_duration_since(started).as_millis() as u64
        });
        TaskSnapshot {
            task_id: self.task_id.clone(),
            tool_name: self.tool_name.clone(),
            tool_args: self.tool_args.clone(),
            session_id: self.session_id.clone(),
            status: state.status,
            created_at: self.created_at_ms,
            runtime_ms,
            result: state.result.clone(),
            error: state.error.clone(),
            output_log_count: state.output_log.len(),
        }
    }
}

impl fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("task_id", &self.task_id)
            .field("tool_name", &self.tool_name)
            .field("session_id", &self.session_id)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskrelay_traits::event_queue;

    fn task() -> BackgroundTask {
        BackgroundTask::new("slow_tool", ToolArgs::new(), "session-1")
    }

    fn assert_finished_invariants(task: &BackgroundTask) {
        assert!(task.is_finished());
        assert!(task.completed_at().is_some());
        assert!(task.result().is_some() ^ task.error().is_some());
    }

    #[test]
    fn test_generate_id_shape() {
        let id = BackgroundTask::generate_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_lifecycle_complete() {
        let task = task();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(task.completed_at().is_none());

        assert!(task.start());
        assert!(!task.start());
        assert_eq!(task.status(), TaskStatus::Running);
        assert!(task.started_at().is_some());
        assert!(!task.is_finished());

        assert!(task.complete("done"));
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.result().as_deref(), Some("done"));
        assert_finished_invariants(&task);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let task = task();
        task.start();
        assert!(task.cancel());
        assert!(!task.complete("late"));
        assert!(!task.fail("late"));
        assert_eq!(task.status(), TaskStatus::Cancelled);
        assert_eq!(task.error().as_deref(), Some(CANCELLED_ERROR));
        assert_finished_invariants(&task);
    }

    #[test]
    fn test_fail_sets_error_only() {
        let task = task();
        task.start();
        assert!(task.fail("boom"));
        assert!(task.result().is_none());
        assert_finished_invariants(&task);
    }

    #[test]
    fn test_notification_bookkeeping() {
        let task = task();
        assert!(!task.mark_notification_sent());
        assert!(task.set_notification_message("first"));
        assert!(!task.set_notification_message("second"));
        assert_eq!(task.notification_message().as_deref(), Some("first"));
        assert!(task.mark_notification_sent());
        assert!(!task.mark_notification_sent());
        assert!(task.is_notification_sent());
    }

    #[test]
    fn test_waiters_are_counted() {
        let task = task();
        assert!(task.add_waiter());
        assert!(task.add_waiter());
        task.remove_waiter();
        assert!(task.is_being_waited());
        task.remove_waiter();
        task.remove_waiter();
        assert!(!task.is_being_waited());
    }

    #[test]
    fn test_callback_suppression_fixed_at_finish() {
        let waited = task();
        assert!(waited.add_waiter());
        waited.start();
        waited.complete("done");
        waited.remove_waiter();
        assert!(!waited.is_being_waited());
        assert!(waited.is_callback_suppressed());
        assert!(!waited.add_waiter());

        let unwaited = task();
        assert!(unwaited.add_waiter());
        unwaited.remove_waiter();
        unwaited.start();
        unwaited.complete("done");
        assert!(!unwaited.is_callback_suppressed());
    }

    #[tokio::test]
    async fn test_completion_signal_fires_on_finish() {
        let task = Arc::new(task());
        let signal = task.completion_signal().expect("unfinished task has a signal");
        task.start();
        task.complete("ok");
        assert!(signal.is_set());
        assert!(task.completion_signal().is_none());
    }

    #[test]
    fn test_event_queue_is_weak() {
        let (queue, _rx) = event_queue();
        let task = task().with_event_queue(&queue);
        assert!(task.event_queue().is_some());
        drop(queue);
        assert!(task.event_queue().is_none());
    }

    #[test]
    fn test_release_references() {
        let (queue, _rx) = event_queue();
        let task = task()
            .with_event(Arc::new(AgentEvent::new("cli", "session-1", "hi")))
            .with_event_queue(&queue);
        let _signal = task.completion_signal();
        task.append_output("line");
        assert!(task.has_references());

        task.release_references();
        assert!(!task.has_references());
        assert!(task.event().is_none());
        assert_eq!(task.output_log_count(), 0);
    }

    #[test]
    fn test_snapshot_serializes_status() {
        let task = task();
        task.start();
        task.complete("ok");
        let json = serde_json::to_value(task.snapshot()).expect("snapshot serializes");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["tool_name"], "slow_tool");
        assert_eq!(json["result"], "ok");
    }
}
