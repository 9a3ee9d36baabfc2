//! Conversation front end: polls the chat transport and runs one task per event
//!
//! A failing task only affects its own conversation. On shutdown polling
//! stops and in-flight tasks are awaited.

pub mod messages;
mod telegram;
pub mod testing; // Expose for tests (RecordingTransport)
mod transport;

pub use telegram::TelegramTransport;
pub use transport::{Choice, ConversationTransport, InboundEvent, MessageRef, TransportError};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::pipeline::Pipeline;
use crate::session::ConversationId;
use messages::{Command, Inbound};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct Dispatcher {
    transport: Arc<dyn ConversationTransport>,
    pipeline: Arc<Pipeline>,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn ConversationTransport>, pipeline: Arc<Pipeline>) -> Self {
        Self {
            transport,
            pipeline,
            tracker: TaskTracker::new(),
        }
    }

    /// Poll until `cancel` fires, then wait for in-flight events to finish
    pub async fn run(self, cancel: CancellationToken) {
        info!("Dispatcher started");
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.transport.next_events() => polled,
            };

            match polled {
                Ok(events) => {
                    backoff = INITIAL_BACKOFF;
                    for event in events {
                        self.spawn(event, cancel.clone());
                    }
                }
                Err(e) => {
                    warn!(error = %e, retry_in_secs = backoff.as_secs(), "Polling failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }

        self.tracker.close();
        info!(in_flight = self.tracker.len(), "Dispatcher stopping, waiting for tasks");
        self.tracker.wait().await;
        info!("Dispatcher stopped");
    }

    fn spawn(&self, event: InboundEvent, cancel: CancellationToken) {
        let transport = self.transport.clone();
        let pipeline = self.pipeline.clone();
        self.tracker.spawn(async move {
            let conversation = event.conversation();
            if let Err(e) = handle_event(transport.as_ref(), &pipeline, event, &cancel).await {
                warn!(%conversation, error = %e, "Reply lost");
            }
        });
    }
}

/// Handle one inbound event to completion
pub async fn handle_event(
    transport: &dyn ConversationTransport,
    pipeline: &Pipeline,
    event: InboundEvent,
    cancel: &CancellationToken,
) -> Result<(), TransportError> {
    match event {
        InboundEvent::Text { conversation, text } => {
            handle_text(transport, pipeline, conversation, &text, cancel).await
        }
        InboundEvent::Selection {
            conversation,
            callback_id,
            message,
            data,
        } => {
            handle_selection(
                transport,
                pipeline,
                conversation,
                &callback_id,
                message,
                &data,
                cancel,
            )
            .await
        }
    }
}

async fn handle_text(
    transport: &dyn ConversationTransport,
    pipeline: &Pipeline,
    conversation: ConversationId,
    text: &str,
    cancel: &CancellationToken,
) -> Result<(), TransportError> {
    let chat = conversation.chat;

    match messages::parse_text(text) {
        Inbound::Command(Command::Start | Command::Help) => {
            transport.send_text(chat, messages::HELP).await?;
        }
        Inbound::Command(Command::Clear) => {
            let stats = pipeline.clear(conversation).await;
            transport.send_text(chat, &messages::cleared(stats)).await?;
        }
        Inbound::Url(url) => {
            let status = transport.send_text(chat, messages::PROCESSING).await?;
            match pipeline.submit(conversation, &url, cancel).await {
                Ok(offer) if offer.shortlist.is_empty() => {
                    transport
                        .edit_text(&status, &messages::no_formats(&offer))
                        .await?;
                }
                Ok(offer) => {
                    transport
                        .present_choices(
                            chat,
                            Some(&status),
                            &messages::offer_text(&offer),
                            &messages::choices(&offer),
                        )
                        .await?;
                }
                Err(e) => {
                    transport.edit_text(&status, &messages::failure(&e)).await?;
                }
            }
        }
        Inbound::Ignored => {
            debug!(%conversation, "Ignoring text");
        }
    }

    Ok(())
}

async fn handle_selection(
    transport: &dyn ConversationTransport,
    pipeline: &Pipeline,
    conversation: ConversationId,
    callback_id: &str,
    message: Option<MessageRef>,
    data: &str,
    cancel: &CancellationToken,
) -> Result<(), TransportError> {
    let Some((generation, index)) = messages::parse_pick(data) else {
        debug!(%conversation, data, "Unrecognised callback data");
        return transport
            .acknowledge(callback_id, Some(messages::UNKNOWN_CHOICE))
            .await;
    };
    transport.acknowledge(callback_id, None).await?;

    let height = pipeline
        .sessions()
        .get(conversation)
        .await
        .ok()
        .filter(|s| s.generation == generation)
        .and_then(|s| s.shortlist.get(index).and_then(|v| v.height));

    let status = match message {
        Some(existing) => {
            transport
                .edit_text(&existing, &messages::downloading(height))
                .await?;
            existing
        }
        None => {
            transport
                .send_text(conversation.chat, &messages::downloading(height))
                .await?
        }
    };

    let reply = match pipeline.select(conversation, generation, index, cancel).await {
        Ok(delivery) => messages::delivered(&delivery),
        Err(e) => messages::failure(&e),
    };
    transport.edit_text(&status, &reply).await
}
