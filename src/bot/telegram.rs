//! Telegram Bot API over HTTPS long polling

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::transport::{Choice, ConversationTransport, InboundEvent, MessageRef, TransportError};
use crate::config::TransportConfig;
use crate::session::ConversationId;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    chat: Chat,
    #[serde(default)]
    from: Option<User>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    from: User,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Serialize)]
struct InlineButton<'a> {
    text: &'a str,
    callback_data: &'a str,
}

fn into_event(update: Update) -> Option<InboundEvent> {
    if let Some(query) = update.callback_query {
        let message = query.message.map(|m| MessageRef {
            chat: m.chat.id,
            message_id: m.message_id,
        });
        let chat = message.map(|m| m.chat).unwrap_or(query.from.id);
        return Some(InboundEvent::Selection {
            conversation: ConversationId::new(chat, query.from.id),
            callback_id: query.id,
            message,
            data: query.data.unwrap_or_default(),
        });
    }

    let message = update.message?;
    let text = message.text?;
    let user = message.from.map(|u| u.id).unwrap_or(message.chat.id);
    Some(InboundEvent::Text {
        conversation: ConversationId::new(message.chat.id, user),
        text,
    })
}

fn keyboard(choices: &[Choice]) -> serde_json::Value {
    let rows: Vec<Vec<InlineButton<'_>>> = choices
        .iter()
        .map(|c| {
            vec![InlineButton {
                text: &c.label,
                callback_data: &c.data,
            }]
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

pub struct TelegramTransport {
    client: Client,
    /// `<api_base>/bot<token>`; never logged
    endpoint: String,
    poll_timeout: Duration,
    offset: AtomicI64,
}

impl TelegramTransport {
    pub fn new(config: &TransportConfig, token: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TransportError::Request(e.without_url().to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/bot{}", config.api_base.trim_end_matches('/'), token),
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
            offset: AtomicI64::new(0),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<T, TransportError> {
        let response = self
            .client
            .post(format!("{}/{method}", self.endpoint))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.without_url().to_string()))?;

        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| TransportError::Request(e.without_url().to_string()))?;

        match parsed {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => {
                let description = description.unwrap_or_else(|| "no description".to_string());
                debug!(method, %description, "Bot API call rejected");
                Err(TransportError::Api(description))
            }
        }
    }
}

#[async_trait]
impl ConversationTransport for TelegramTransport {
    async fn next_events(&self) -> Result<Vec<InboundEvent>, TransportError> {
        let body = json!({
            "offset": self.offset.load(Ordering::Relaxed),
            "timeout": self.poll_timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        let updates: Vec<Update> = self
            .call("getUpdates", body, self.poll_timeout + REQUEST_TIMEOUT)
            .await?;

        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            self.offset.store(last + 1, Ordering::Relaxed);
        }

        Ok(updates.into_iter().filter_map(into_event).collect())
    }

    async fn send_text(&self, chat: i64, text: &str) -> Result<MessageRef, TransportError> {
        let body = json!({
            "chat_id": chat,
            "text": text,
            "disable_web_page_preview": true,
        });
        let message: Message = self.call("sendMessage", body, REQUEST_TIMEOUT).await?;
        Ok(MessageRef {
            chat: message.chat.id,
            message_id: message.message_id,
        })
    }

    async fn edit_text(&self, message: &MessageRef, text: &str) -> Result<(), TransportError> {
        let body = json!({
            "chat_id": message.chat,
            "message_id": message.message_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        self.call::<serde_json::Value>("editMessageText", body, REQUEST_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn present_choices(
        &self,
        chat: i64,
        replace: Option<&MessageRef>,
        text: &str,
        choices: &[Choice],
    ) -> Result<MessageRef, TransportError> {
        if let Some(existing) = replace {
            let body = json!({
                "chat_id": existing.chat,
                "message_id": existing.message_id,
                "text": text,
                "reply_markup": keyboard(choices),
            });
            match self
                .call::<serde_json::Value>("editMessageText", body, REQUEST_TIMEOUT)
                .await
            {
                Ok(_) => return Ok(*existing),
                Err(e) => warn!(error = %e, "Could not edit message, sending a new one"),
            }
        }

        let body = json!({
            "chat_id": chat,
            "text": text,
            "reply_markup": keyboard(choices),
        });
        let message: Message = self.call("sendMessage", body, REQUEST_TIMEOUT).await?;
        Ok(MessageRef {
            chat: message.chat.id,
            message_id: message.message_id,
        })
    }

    async fn acknowledge(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.call::<bool>("answerCallbackQuery", body, REQUEST_TIMEOUT)
            .await
            .map(|_| ())
    }
}
