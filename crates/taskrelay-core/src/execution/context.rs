//! Per-call run context handed to the tool executor.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use taskrelay_traits::{AgentEvent, DirectSender, EventQueue, MessageChain};

/// Everything a single tool call can see of the conversation that issued it.
pub struct RunContext {
    event: Arc<AgentEvent>,
    tool_call_timeout: Duration,
    event_queue: Option<Arc<dyn EventQueue>>,
    direct_sender: Option<Arc<dyn DirectSender>>,
    /// Chain a handler asked to send straight to the user.
    pending_result: Mutex<Option<MessageChain>>,
}

impl RunContext {
    /// A context with the tool-call timeout disabled.
    pub fn new(event: Arc<AgentEvent>) -> Self {
        Self {
            event,
            tool_call_timeout: Duration::ZERO,
            event_queue: None,
            direct_sender: None,
            pending_result: Mutex::new(None),
        }
    }

    /// Zero disables the timeout.
    pub fn with_tool_call_timeout(mut self, timeout: Duration) -> Self {
        self.tool_call_timeout = timeout;
        self
    }

    pub fn with_event_queue(mut self, queue: Arc<dyn EventQueue>) -> Self {
        self.event_queue = Some(queue);
        self
    }

    pub fn with_direct_sender(mut self, sender: Arc<dyn DirectSender>) -> Self {
        self.direct_sender = Some(sender);
        self
    }

    pub fn event(&self) -> &Arc<AgentEvent> {
        &self.event
    }

    pub fn session_id(&self) -> &str {
        &self.event.session_id
    }

    pub fn tool_call_timeout(&self) -> Duration {
        self.tool_call_timeout
    }

    pub fn event_queue(&self) -> Option<Arc<dyn EventQueue>> {
        self.event_queue.clone()
    }

    pub fn direct_sender(&self) -> Option<Arc<dyn DirectSender>> {
        self.direct_sender.clone()
    }

    /// Park a chain for direct delivery; replaces any chain not yet flushed.
    pub fn set_pending_result(&self, chain: MessageChain) {
        *self.pending_result.lock() = Some(chain);
    }

    pub fn take_pending_result(&self) -> Option<MessageChain> {
        self.pending_result.lock().take()
    }

    pub fn has_pending_result(&self) -> bool {
        self.pending_result.lock().is_some()
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("session_id", &self.event.session_id)
            .field("tool_call_timeout", &self.tool_call_timeout)
            .field("has_event_queue", &self.event_queue.is_some())
            .field("has_direct_sender", &self.direct_sender.is_some())
            .finish()
    }
}
