//! [`ChatSink`] over a [`Transport`].

use std::sync::Arc;

use async_trait::async_trait;
use covenant_commands::{ChatSink, IncomingMessage, SinkError};
use covenant_transport::{Transport, TransportError};
use serde::Serialize;

use crate::wills::{ADD_REACTION, OutgoingMessage, Reaction, SEND_MESSAGE};

/// Turns chat actions into `SendMessage` / `AddReaction` envelopes.
pub struct TransportSink<T: Transport> {
    transport: Arc<T>,
}

impl<T: Transport> TransportSink<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    async fn post(&self, will: &str, payload: &impl Serialize) -> Result<(), SinkError> {
        let obj = serde_json::to_value(payload).map_err(|e| SinkError::Failed(Box::new(e)))?;
        self.transport.send(will, Some(obj)).await.map_err(|e| match e {
            TransportError::NotConnected => SinkError::Unavailable,
            other => SinkError::Failed(Box::new(other)),
        })
    }
}

impl<T: Transport> Clone for TransportSink<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

#[async_trait]
impl<T: Transport> ChatSink for TransportSink<T> {
    async fn reply(&self, to: &IncomingMessage, text: &str) -> Result<(), SinkError> {
        let message = OutgoingMessage {
            channel_id: to.channel.clone(),
            content: text.to_owned(),
            reply_to: Some(to.message_id.clone()).filter(|id| !id.is_empty()),
        };
        self.post(SEND_MESSAGE, &message).await
    }

    async fn send(&self, channel: &str, text: &str) -> Result<(), SinkError> {
        let message = OutgoingMessage {
            channel_id: channel.to_owned(),
            content: text.to_owned(),
            reply_to: None,
        };
        self.post(SEND_MESSAGE, &message).await
    }

    async fn react(&self, to: &IncomingMessage, emoji: &str) -> Result<(), SinkError> {
        let reaction = Reaction {
            channel_id: to.channel.clone(),
            message_id: to.message_id.clone(),
            emoji: emoji.to_owned(),
        };
        self.post(ADD_REACTION, &reaction).await
    }
}
