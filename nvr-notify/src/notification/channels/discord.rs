//! Discord webhook sender.
//!
//! Retries on 429 responses respecting the `Retry-After` header. Snapshots are
//! uploaded as a multipart file and referenced from the embed.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{
    AlertMessage, AlertSender, DEFAULT_RETRY_AFTER, MAX_RATE_LIMIT_RETRIES, SNAPSHOT_FILE_NAME,
    truncate_text,
};
use crate::notification::profile::ProviderKind;
use crate::{Error, Result};

/// Embed title limit.
const EMBED_TITLE_LIMIT: usize = 256;
/// Embed description limit.
const EMBED_DESCRIPTION_LIMIT: usize = 4096;
/// Embed color.
const EMBED_COLOR: u32 = 0x3498db;

/// Discord sender configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Discord webhook URL.
    pub webhook_url: String,
    /// Optional username for the webhook.
    #[serde(default)]
    pub username: Option<String>,
    /// Optional avatar URL for the webhook.
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Discord sender.
pub struct DiscordSender {
    config: DiscordConfig,
    client: Client,
}

impl DiscordSender {
    pub fn new(config: DiscordConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// Build the webhook payload.
    fn build_payload(&self, message: &AlertMessage) -> serde_json::Value {
        let mut embed = json!({
            "title": truncate_text(&message.title, EMBED_TITLE_LIMIT),
            "description": truncate_text(&message.body, EMBED_DESCRIPTION_LIMIT),
            "color": EMBED_COLOR,
            "timestamp": message.timestamp.to_rfc3339(),
            "footer": { "text": format!("{} | {}", message.camera, message.label) }
        });

        if let Some(url) = &message.links.review_url {
            embed["url"] = json!(url);
        }
        if message.image.is_some() {
            embed["image"] = json!({ "url": format!("attachment://{}", SNAPSHOT_FILE_NAME) });
        }

        let mut payload = json!({ "embeds": [embed] });
        if let Some(username) = &self.config.username {
            payload["username"] = json!(username);
        }
        if let Some(avatar_url) = &self.config.avatar_url {
            payload["avatar_url"] = json!(avatar_url);
        }
        payload
    }

    fn build_request(
        &self,
        payload: &serde_json::Value,
        message: &AlertMessage,
    ) -> Result<RequestBuilder> {
        let request = self.client.post(&self.config.webhook_url);
        let Some(image) = &message.image else {
            return Ok(request.json(payload));
        };

        let file = Part::stream(image.clone())
            .file_name(SNAPSHOT_FILE_NAME)
            .mime_str("image/jpeg")?;
        let form = Form::new()
            .text("payload_json", payload.to_string())
            .part("files[0]", file);
        Ok(request.multipart(form))
    }

    /// Parse the Retry-After duration from a 429 response.
    fn parse_retry_after(response: &Response) -> Option<Duration> {
        ["Retry-After", "X-RateLimit-Reset-After"]
            .iter()
            .filter_map(|name| response.headers().get(*name))
            .filter_map(|value| value.to_str().ok()?.parse::<f64>().ok())
            .find(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
    }
}

#[async_trait]
impl AlertSender for DiscordSender {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Discord
    }

    async fn send(&self, message: &AlertMessage) -> Result<()> {
        let payload = self.build_payload(message);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = self.build_request(&payload, message)?.send().await?;
            let status = response.status();

            if status.is_success() {
                debug!(event_id = %message.event_id, "Discord alert sent");
                return Ok(());
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = Self::parse_retry_after(&response);
                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    return Err(Error::other(format!(
                        "Discord rate limit exceeded after {} retries",
                        MAX_RATE_LIMIT_RETRIES
                    )));
                }

                let wait = retry_after.unwrap_or(DEFAULT_RETRY_AFTER);
                debug!(
                    "Discord rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            warn!("Discord webhook failed: {} - {}", status, body);
            return Err(Error::other(format!(
                "Discord webhook failed: {} - {}",
                status, body
            )));
        }
    }
}
