//! Gotify sender.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{AlertMessage, AlertSender};
use crate::notification::profile::ProviderKind;
use crate::{Error, Result};

/// Gotify sender configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GotifyConfig {
    /// Server base URL.
    pub server: String,
    /// Application token.
    pub token: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
}

fn default_priority() -> u8 {
    5
}

/// Gotify sender.
pub struct GotifySender {
    config: GotifyConfig,
    client: Client,
}

impl GotifySender {
    pub fn new(config: GotifyConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn build_payload(&self, message: &AlertMessage) -> serde_json::Value {
        let mut payload = json!({
            "title": message.title,
            "message": message.body,
            "priority": self.config.priority,
            "extras": {
                "client::display": { "contentType": "text/plain" }
            }
        });
        if let Some(url) = &message.links.review_url {
            payload["extras"]["client::notification"] = json!({ "click": { "url": url } });
        }
        payload
    }
}

#[async_trait]
impl AlertSender for GotifySender {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Gotify
    }

    async fn send(&self, message: &AlertMessage) -> Result<()> {
        let url = format!("{}/message", self.config.server.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("X-Gotify-Key", &self.config.token)
            .json(&self.build_payload(message))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Gotify message failed: {} - {}", status, body);
            return Err(Error::other(format!("Gotify message failed: {} - {}", status, body)));
        }

        debug!(event_id = %message.event_id, "Gotify alert sent");
        Ok(())
    }
}
