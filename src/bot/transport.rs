use async_trait::async_trait;
use thiserror::Error;

use crate::session::ConversationId;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),
}

/// A message previously sent by the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub chat: i64,
    pub message_id: i64,
}

/// One button of a choice list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub label: String,
    /// Opaque payload echoed back in [`InboundEvent::Selection`]
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Text {
        conversation: ConversationId,
        text: String,
    },
    Selection {
        conversation: ConversationId,
        callback_id: String,
        /// Message carrying the pressed button, when the platform still has it
        message: Option<MessageRef>,
        data: String,
    },
}

impl InboundEvent {
    pub fn conversation(&self) -> ConversationId {
        match self {
            InboundEvent::Text { conversation, .. } => *conversation,
            InboundEvent::Selection { conversation, .. } => *conversation,
        }
    }
}

/// Chat platform as seen by the dispatcher.
///
/// No delivery guarantees: a failed call means the update is lost.
#[async_trait]
pub trait ConversationTransport: Send + Sync {
    /// Wait for the next batch of inbound events (may be empty)
    async fn next_events(&self) -> Result<Vec<InboundEvent>, TransportError>;

    async fn send_text(&self, chat: i64, text: &str) -> Result<MessageRef, TransportError>;

    async fn edit_text(&self, message: &MessageRef, text: &str) -> Result<(), TransportError>;

    /// Show `choices` under `text`, replacing `replace` in place when given
    async fn present_choices(
        &self,
        chat: i64,
        replace: Option<&MessageRef>,
        text: &str,
        choices: &[Choice],
    ) -> Result<MessageRef, TransportError>;

    /// Answer a button press so the client stops its spinner
    async fn acknowledge(&self, callback_id: &str, text: Option<&str>)
    -> Result<(), TransportError>;
}
