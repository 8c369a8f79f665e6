//! Telegram Bot API notifier
//!
//! Sends HTML messages with `sendMessage`. Rate limiting, server errors and
//! transport failures are tagged retryable; client errors map to the matching
//! error kind.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::Notifier;
use crate::error::{wrap, AppError, ErrorKind, Retryable};

/// Public Bot API endpoint.
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Bot credentials and the chat messages go to.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
    pub timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            api_base: TELEGRAM_API_BASE.to_string(),
            timeout_secs: 10,
        }
    }
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            ..Self::default()
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

/// A failed Bot API call.
#[derive(Debug, Error)]
#[error("telegram api returned {status}: {description}")]
pub struct TelegramApiError {
    pub status: u16,
    pub description: String,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramNotifier {
    client: Client,
    config: TelegramConfig,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Result<Self, AppError> {
        if config.bot_token.trim().is_empty() {
            return Err(AppError::bad_request("telegram bot token is not configured"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| AppError::internal("failed to create telegram client").with_cause(e))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &TelegramConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        )
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, destination: &str, text: &str) -> Result<(), AppError> {
        let payload = SendMessage {
            chat_id: destination,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        // The URL carries the bot token, so it is stripped from transport errors.
        let response = self
            .client
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                wrap(
                    ErrorKind::Internal,
                    "failed to reach telegram",
                    Some(Box::new(Retryable::new(e.without_url()))),
                )
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            wrap(
                ErrorKind::Internal,
                "failed to read telegram response",
                Some(Box::new(Retryable::new(e.without_url()))),
            )
        })?;
        let reply: Option<ApiReply> = serde_json::from_str(&body).ok();

        match reply {
            Some(ApiReply { ok: true, .. }) if (200..300).contains(&status) => Ok(()),
            Some(reply) => Err(api_error(
                status,
                reply.description.unwrap_or_else(|| "no description".to_string()),
            )),
            None => Err(api_error(status, body.chars().take(256).collect())),
        }
    }
}

/// Maps a Bot API failure onto the error taxonomy.
fn api_error(status: u16, description: String) -> AppError {
    let cause = TelegramApiError {
        status,
        description,
    };
    let (kind, message) = match status {
        429 | 500..=599 => {
            return wrap(
                ErrorKind::Unavailable,
                "telegram is unavailable",
                Some(Box::new(Retryable::new(cause))),
            )
        }
        400 => (ErrorKind::BadRequest, "telegram rejected the message"),
        401 => (ErrorKind::Unauthorized, "telegram rejected the bot token"),
        403 => (ErrorKind::PermissionDenied, "bot is not allowed to post to this chat"),
        404 => (ErrorKind::DataNotFound, "telegram bot or chat not found"),
        _ => (ErrorKind::Internal, "telegram send failed"),
    };
    wrap(kind, message, Some(Box::new(cause)))
}
