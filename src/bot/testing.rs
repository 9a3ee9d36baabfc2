//! In-memory transport for tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::transport::{Choice, ConversationTransport, InboundEvent, MessageRef, TransportError};

/// Something the bot sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text {
        message: MessageRef,
        text: String,
    },
    Edit {
        message: MessageRef,
        text: String,
    },
    Choices {
        message: MessageRef,
        text: String,
        choices: Vec<Choice>,
    },
    Ack {
        callback_id: String,
        text: Option<String>,
    },
}

/// Transport fed from a queue of event batches that records every outbound call
#[derive(Debug, Default)]
pub struct RecordingTransport {
    inbox: Mutex<VecDeque<Vec<InboundEvent>>>,
    outbox: Mutex<Vec<Outgoing>>,
    next_message_id: AtomicI64,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, events: Vec<InboundEvent>) {
        self.inbox.lock().await.push_back(events);
    }

    pub async fn sent(&self) -> Vec<Outgoing> {
        self.outbox.lock().await.clone()
    }

    /// Poll until `predicate` holds for the outbox or `timeout` elapses
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> Vec<Outgoing>
    where
        F: Fn(&[Outgoing]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let sent = self.sent().await;
            if predicate(&sent) || tokio::time::Instant::now() >= deadline {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn message(&self, chat: i64) -> MessageRef {
        MessageRef {
            chat,
            message_id: self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }

    async fn record(&self, outgoing: Outgoing) {
        self.outbox.lock().await.push(outgoing);
    }
}

#[async_trait]
impl ConversationTransport for RecordingTransport {
    async fn next_events(&self) -> Result<Vec<InboundEvent>, TransportError> {
        let batch = self.inbox.lock().await.pop_front();
        match batch {
            Some(events) => Ok(events),
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn send_text(&self, chat: i64, text: &str) -> Result<MessageRef, TransportError> {
        let message = self.message(chat);
        self.record(Outgoing::Text {
            message,
            text: text.to_string(),
        })
        .await;
        Ok(message)
    }

    async fn edit_text(&self, message: &MessageRef, text: &str) -> Result<(), TransportError> {
        self.record(Outgoing::Edit {
            message: *message,
            text: text.to_string(),
        })
        .await;
        Ok(())
    }

    async fn present_choices(
        &self,
        chat: i64,
        replace: Option<&MessageRef>,
        text: &str,
        choices: &[Choice],
    ) -> Result<MessageRef, TransportError> {
        let message = replace.copied().unwrap_or_else(|| self.message(chat));
        self.record(Outgoing::Choices {
            message,
            text: text.to_string(),
            choices: choices.to_vec(),
        })
        .await;
        Ok(message)
    }

    async fn acknowledge(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        self.record(Outgoing::Ack {
            callback_id: callback_id.to_string(),
            text: text.map(str::to_string),
        })
        .await;
        Ok(())
    }
}
