//! Outbound events fanned out to every registered participant.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A server → client event.
///
/// Wire shape is an internally tagged object:
/// `{"type":"roster_update","participants":[...]}` or
/// `{"type":"chat_message","sender":"...","text":"..."}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Full set of currently registered identities.
    RosterUpdate {
        /// Sorted identities.
        participants: Vec<String>,
    },
    /// A chat line relayed from one participant.
    ChatMessage {
        /// Identity of the sending participant.
        sender: String,
        /// Payload exactly as received.
        text: String,
    },
}

impl OutboundEvent {
    /// Build a roster update.
    pub fn roster(participants: Vec<String>) -> Self {
        Self::RosterUpdate { participants }
    }

    /// Build a chat message.
    pub fn chat(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::ChatMessage {
            sender: sender.into(),
            text: text.into(),
        }
    }

    /// Wire name of the event variant, for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RosterUpdate { .. } => "roster_update",
            Self::ChatMessage { .. } => "chat_message",
        }
    }

    /// Serialize once into a shared buffer that every handle queue can hold.
    pub fn encode(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}
