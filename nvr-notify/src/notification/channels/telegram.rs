//! Telegram Bot API sender.
//!
//! Text-only alerts go through `sendMessage`; alerts with a snapshot go
//! through `sendPhoto` with the text as caption. Handles 429 rate limits by
//! respecting the `parameters.retry_after` field of the response body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{
    AlertMessage, AlertSender, DEFAULT_RETRY_AFTER, MAX_RATE_LIMIT_RETRIES, SNAPSHOT_FILE_NAME,
    truncate_text,
};
use crate::notification::profile::ProviderKind;
use crate::{Error, Result};

/// `sendMessage` text limit (characters).
const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// `sendPhoto` caption limit (characters).
const TELEGRAM_CAPTION_LIMIT: usize = 1024;

/// Telegram sender configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram Bot API token.
    pub bot_token: String,
    /// Target chat ID (user, group, or channel).
    pub chat_id: String,
    /// Bot API base URL, for self-hosted API servers.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Send without a notification sound.
    #[serde(default)]
    pub silent: bool,
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            api_url: default_api_url(),
            silent: false,
        }
    }
}

/// Telegram sender.
pub struct TelegramSender {
    config: TelegramConfig,
    client: Client,
}

impl TelegramSender {
    pub fn new(config: TelegramConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    /// Build the HTML message text.
    fn build_text(message: &AlertMessage, limit: usize) -> String {
        let mut text = format!(
            "<b>{}</b>\n\n{}",
            escape_html(&message.title),
            escape_html(&message.body)
        );
        if let Some(url) = &message.links.review_url {
            text.push_str(&format!("\n\n<a href=\"{}\">Review</a>", escape_html(url)));
        }
        if let Some(url) = &message.links.clip_url {
            text.push_str(&format!(" | <a href=\"{}\">Clip</a>", escape_html(url)));
        }
        truncate_text(&text, limit)
    }

    fn build_request(&self, message: &AlertMessage) -> Result<RequestBuilder> {
        let Some(image) = &message.image else {
            let payload = json!({
                "chat_id": self.config.chat_id,
                "text": Self::build_text(message, TELEGRAM_MESSAGE_LIMIT),
                "parse_mode": "HTML",
                "disable_notification": self.config.silent,
            });
            return Ok(self.client.post(self.method_url("sendMessage")).json(&payload));
        };

        let photo = Part::stream(image.clone())
            .file_name(SNAPSHOT_FILE_NAME)
            .mime_str("image/jpeg")?;
        let form = Form::new()
            .text("chat_id", self.config.chat_id.clone())
            .text("caption", Self::build_text(message, TELEGRAM_CAPTION_LIMIT))
            .text("parse_mode", "HTML")
            .text("disable_notification", self.config.silent.to_string())
            .part("photo", photo);
        Ok(self.client.post(self.method_url("sendPhoto")).multipart(form))
    }
}

#[async_trait]
impl AlertSender for TelegramSender {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Telegram
    }

    async fn send(&self, message: &AlertMessage) -> Result<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = self.build_request(message)?.send().await?;
            let status = response.status();

            if status.is_success() {
                debug!(event_id = %message.event_id, "Telegram alert sent");
                return Ok(());
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let body: serde_json::Value = response.json().await.unwrap_or_default();
                let retry_after = body
                    .get("parameters")
                    .and_then(|p| p.get("retry_after"))
                    .and_then(|v| v.as_u64())
                    .map(Duration::from_secs);

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    return Err(Error::other(format!(
                        "Telegram rate limit exceeded after {} retries",
                        MAX_RATE_LIMIT_RETRIES
                    )));
                }

                let wait = retry_after.unwrap_or(DEFAULT_RETRY_AFTER);
                debug!(
                    "Telegram rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            warn!("Telegram request failed: {} - {}", status, body);
            return Err(Error::other(format!(
                "Telegram request failed: {} - {}",
                status, body
            )));
        }
    }
}

/// Escape the characters Telegram's HTML parse mode treats as markup.
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
