//! What a command sees while it runs, and where its output goes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::SinkError;

/// A chat message as the dispatcher sees it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IncomingMessage {
    /// Platform id of the message, used for replies, reactions and dedup.
    pub message_id: String,
    /// Platform id of the user who wrote it.
    pub author: String,
    /// Channel the message was posted in.
    pub channel: String,
    pub text: String,
}

impl IncomingMessage {
    pub fn new(
        message_id: impl Into<String>,
        author: impl Into<String>,
        channel: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            author: author.into(),
            channel: channel.into(),
            text: text.into(),
        }
    }
}

/// Outbound chat actions available to commands and dispatcher notices.
///
/// The client implements this over a transport. Tests implement it by
/// recording what would have been sent.
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Posts `text` in the channel `to` was posted in.
    async fn reply(&self, to: &IncomingMessage, text: &str) -> Result<(), SinkError>;

    /// Posts `text` in an arbitrary channel.
    async fn send(&self, channel: &str, text: &str) -> Result<(), SinkError>;

    /// Adds a reaction to `to`.
    async fn react(&self, to: &IncomingMessage, emoji: &str) -> Result<(), SinkError>;
}

/// Handed to every command callback.
///
/// Cheap to clone; the message and sink are shared.
#[derive(Clone)]
pub struct CommandContext {
    trigger: String,
    args: Vec<String>,
    is_owner: bool,
    message: Arc<IncomingMessage>,
    sink: Arc<dyn ChatSink>,
}

impl CommandContext {
    pub(crate) fn new(
        trigger: String,
        args: Vec<String>,
        is_owner: bool,
        message: Arc<IncomingMessage>,
        sink: Arc<dyn ChatSink>,
    ) -> Self {
        Self {
            trigger,
            args,
            is_owner,
            message,
            sink,
        }
    }

    /// Canonical trigger of the running command, even if an alias was
    /// typed.
    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Arguments joined back with single spaces.
    pub fn rest(&self) -> String {
        self.args.join(" ")
    }

    pub fn author(&self) -> &str {
        &self.message.author
    }

    pub fn channel(&self) -> &str {
        &self.message.channel
    }

    pub fn message(&self) -> &IncomingMessage {
        &self.message
    }

    /// Whether the caller is the configured owner.
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    pub async fn reply(&self, text: &str) -> Result<(), SinkError> {
        self.sink.reply(&self.message, text).await
    }

    pub async fn send(&self, channel: &str, text: &str) -> Result<(), SinkError> {
        self.sink.send(channel, text).await
    }

    pub async fn react(&self, emoji: &str) -> Result<(), SinkError> {
        self.sink.react(&self.message, emoji).await
    }
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("trigger", &self.trigger)
            .field("args", &self.args)
            .field("is_owner", &self.is_owner)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}
