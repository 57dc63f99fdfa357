//! Raw reqwest Telegram Bot API client.
//!
//! Covers the three methods the notifier needs: `getMe` to validate the
//! token, `sendMessage` for delivery, and `getUpdates` for auto-subscribe
//! and the interactive bot. Every call carries a bounded timeout.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::autosubscribe::UpdateSource;
use crate::dispatch::{DeliveryOptions, MessageFormat, MessageSender};
use crate::subscribers::ChatId;

// ── Constants ───────────────────────────────────────────────────────

/// Bot API base URL. The token is appended as `/bot<token>/<method>`.
const API_BASE: &str = "https://api.telegram.org";

// ── Errors ──────────────────────────────────────────────────────────

/// Errors from Telegram API calls.
///
/// Everything except `Unauthorized` is scoped to a single recipient or call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeliveryError {
    #[error("bot was blocked by the user: {0}")]
    Blocked(String),
    #[error("chat not found: {0}")]
    ChatNotFound(String),
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimit { retry_after: Option<u64> },
    #[error("network error: {0}")]
    Network(String),
    #[error("bot token rejected: {0}")]
    Unauthorized(String),
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl DeliveryError {
    /// Short machine-friendly reason, used in delivery reports.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Blocked(_) => "blocked",
            Self::ChatNotFound(_) => "chat_not_found",
            Self::RateLimit { .. } => "rate_limit",
            Self::Network(_) => "network",
            Self::Unauthorized(_) => "unauthorized",
            Self::Rejected(_) => "rejected",
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    /// The request URL carries the bot token, so it never reaches the message.
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.without_url().to_string())
    }
}

pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Map a failed Bot API response onto a [`DeliveryError`].
pub fn classify(status: u16, description: &str, retry_after: Option<u64>) -> DeliveryError {
    match status {
        401 | 404 => DeliveryError::Unauthorized(description.to_string()),
        403 => DeliveryError::Blocked(description.to_string()),
        429 => DeliveryError::RateLimit { retry_after },
        400 if description.to_lowercase().contains("chat not found") => {
            DeliveryError::ChatNotFound(description.to_string())
        }
        500..=599 => DeliveryError::Network(format!("{} {}", status, description)),
        _ => DeliveryError::Rejected(format!("{} {}", status, description)),
    }
}

// ── Wire types ──────────────────────────────────────────────────────

/// Envelope every Bot API response is wrapped in.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// The bot's own account, from `getMe`.
#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: i64,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub date: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub title: Option<String>,
}

impl Chat {
    /// Best human-readable name for logs.
    pub fn display_name(&self) -> String {
        self.title
            .clone()
            .or_else(|| self.username.as_ref().map(|u| format!("@{}", u)))
            .or_else(|| self.first_name.clone())
            .unwrap_or_else(|| self.id.to_string())
    }
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    disable_notification: bool,
    disable_web_page_preview: bool,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    limit: u32,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    #[allow(dead_code)]
    message_id: i64,
}

fn parse_mode(format: MessageFormat) -> Option<&'static str> {
    match format {
        MessageFormat::Markdown => Some("Markdown"),
        MessageFormat::Html => Some("HTML"),
        MessageFormat::Plain => None,
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// A minimal Telegram Bot API client.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    token: String,
    timeout: Duration,
}

impl TelegramClient {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Network(e.to_string()))?;
        Ok(Self {
            client,
            token: token.into(),
            timeout,
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.token, method)
    }

    /// Validate the token. `Unauthorized` here is a fatal credential error.
    pub async fn get_me(&self) -> Result<BotUser> {
        self.call("getMe", &serde_json::json!({}), self.timeout).await
    }

    pub async fn send_message(&self, chat_id: &ChatId, text: &str, options: DeliveryOptions) -> Result<()> {
        let body = SendMessageRequest {
            chat_id: chat_id.as_str(),
            text,
            parse_mode: parse_mode(options.format),
            disable_notification: options.silent,
            disable_web_page_preview: true,
        };
        let _sent: SentMessage = self.call("sendMessage", &body, self.timeout).await?;
        Ok(())
    }

    /// Fetch pending updates. Passing `offset = last_update_id + 1`
    /// acknowledges everything before it.
    pub async fn get_updates(&self, offset: Option<i64>, limit: u32, poll_timeout_secs: u64) -> Result<Vec<Update>> {
        let body = GetUpdatesRequest {
            offset,
            limit,
            timeout: poll_timeout_secs,
            allowed_updates: ["message"],
        };
        let timeout = self.timeout + Duration::from_secs(poll_timeout_secs);
        self.call("getUpdates", &body, timeout).await
    }

    async fn call<B: Serialize, T: DeserializeOwned>(&self, method: &str, body: &B, timeout: Duration) -> Result<T> {
        let response = self
            .client
            .post(self.url(method))
            .timeout(timeout)
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        decode_response(status, &text)
    }
}

/// Decode a Bot API response body, classifying failures.
fn decode_response<T: DeserializeOwned>(status: u16, body: &str) -> Result<T> {
    let envelope: Envelope<T> = match serde_json::from_str(body) {
        Ok(e) => e,
        Err(e) => {
            return Err(if (200..300).contains(&status) {
                DeliveryError::Rejected(format!("malformed response: {}", e))
            } else {
                classify(status, body.trim(), None)
            })
        }
    };

    if envelope.ok {
        return envelope
            .result
            .ok_or_else(|| DeliveryError::Rejected("response without result".to_string()));
    }

    let description = envelope.description.unwrap_or_else(|| "unknown error".to_string());
    let retry_after = envelope.parameters.and_then(|p| p.retry_after);
    Err(classify(status, &description, retry_after))
}

#[async_trait]
impl MessageSender for TelegramClient {
    async fn deliver(&self, chat_id: &ChatId, text: &str, options: DeliveryOptions) -> Result<()> {
        self.send_message(chat_id, text, options).await
    }
}

#[async_trait]
impl UpdateSource for TelegramClient {
    async fn fetch_updates(&self, offset: Option<i64>, limit: u32, poll_timeout_secs: u64) -> Result<Vec<Update>> {
        self.get_updates(offset, limit, poll_timeout_secs).await
    }
}

// ── Tests ───────────────────────────────────────────────────────────
