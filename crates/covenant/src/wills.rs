//! Well-known platform commands and their payloads.

use covenant_commands::IncomingMessage;
use serde::{Deserialize, Serialize};

/// Inbound: a user posted a chat message.
pub const NEW_MESSAGE: &str = "NewMessage";

/// Outbound: post a chat message.
pub const SEND_MESSAGE: &str = "SendMessage";

/// Outbound: react to a chat message.
pub const ADD_REACTION: &str = "AddReaction";

/// `Obj` of a [`NEW_MESSAGE`] envelope. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ChatMessage {
    pub message_id: String,
    pub author_id: String,
    pub channel_id: String,
    pub content: String,
}

impl From<ChatMessage> for IncomingMessage {
    fn from(msg: ChatMessage) -> Self {
        IncomingMessage {
            message_id: msg.message_id,
            author: msg.author_id,
            channel: msg.channel_id,
            text: msg.content,
        }
    }
}

/// `Obj` of a [`SEND_MESSAGE`] envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutgoingMessage {
    pub channel_id: String,
    pub content: String,
    /// Message being answered, if this is a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

/// `Obj` of an [`ADD_REACTION`] envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Reaction {
    pub channel_id: String,
    pub message_id: String,
    pub emoji: String,
}
