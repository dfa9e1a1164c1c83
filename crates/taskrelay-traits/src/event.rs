//! Inbound events and outbound message chains.
//!
//! An [`AgentEvent`] is what a platform adapter hands to the agent loop. The
//! execution core never renders anything itself; it only reads the session
//! identity from events and, when a background task finishes, derives a new
//! synthetic event from the one that triggered it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of conversation an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Group,
    #[default]
    Private,
    Other,
}

/// Author of an inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSender {
    pub user_id: String,
    pub nickname: Option<String>,
}

/// One component of a message chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageComponent {
    Plain { text: String },
    Image { url: String },
    At { user_id: String },
}

/// Ordered list of components sent as one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageChain {
    pub components: Vec<MessageComponent>,
    /// Free-form tag describing where the chain came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl MessageChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            components: vec![MessageComponent::Plain { text: text.into() }],
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn push(mut self, component: MessageComponent) -> Self {
        self.components.push(component);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Concatenated text of all plain components.
    pub fn plain_text(&self) -> String {
        self.components
            .iter()
            .filter_map(|c| match c {
                MessageComponent::Plain { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// An inbound event from a messaging platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Adapter that produced the event.
    pub platform: String,
    /// Unified origin identifying the conversation. Tasks are grouped by it.
    pub session_id: String,
    pub message_id: String,
    pub message_type: MessageType,
    pub self_id: String,
    pub sender: EventSender,
    pub group_id: Option<String>,
    pub message_str: String,
    pub message: MessageChain,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    pub is_wake: bool,
    pub is_at_or_wake_command: bool,
    #[serde(default)]
    pub extras: Map<String, Value>,
}

impl AgentEvent {
    /// Minimal private-chat event carrying `text`.
    pub fn new(
        platform: impl Into<String>,
        session_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        Self {
            platform: platform.into(),
            session_id: session_id.into(),
            message_id: String::new(),
            message_type: MessageType::Private,
            self_id: String::new(),
            sender: EventSender::default(),
            group_id: None,
            message: MessageChain::plain(text.clone()),
            message_str: text,
            timestamp: chrono::Utc::now().timestamp(),
            is_wake: false,
            is_at_or_wake_command: false,
            extras: Map::new(),
        }
    }

    pub fn with_sender(mut self, user_id: impl Into<String>, nickname: Option<String>) -> Self {
        self.sender = EventSender {
            user_id: user_id.into(),
            nickname,
        };
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extras.get(key)
    }

    pub fn set_extra(&mut self, key: impl Into<String>, value: Value) {
        self.extras.insert(key.into(), value);
    }
}
