//! Outbound sinks: the event queue and the direct-send side channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::QueueError;
use crate::event::{AgentEvent, MessageChain};

/// Unbounded FIFO that feeds events back into the agent loop.
///
/// Producers only ever call [`put_nowait`](Self::put_nowait); it must not block.
pub trait EventQueue: Send + Sync {
    fn put_nowait(&self, event: AgentEvent) -> Result<(), QueueError>;
}

impl EventQueue for mpsc::UnboundedSender<AgentEvent> {
    fn put_nowait(&self, event: AgentEvent) -> Result<(), QueueError> {
        self.send(event).map_err(|_| QueueError::Closed)
    }
}

/// Create an unbounded event queue and the receiver that drains it.
pub fn event_queue() -> (Arc<dyn EventQueue>, mpsc::UnboundedReceiver<AgentEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(tx), rx)
}

/// Sends a message chain straight to the user, bypassing the model.
#[async_trait]
pub trait DirectSender: Send + Sync {
    async fn send(&self, event: &AgentEvent, chain: MessageChain) -> anyhow::Result<()>;
}
