//! ntfy sender.
//!
//! Text alerts are POSTed to the topic with the body as message. Alerts with a
//! snapshot PUT the image as an attachment and carry the text as the
//! `message` parameter. Title, click target, priority and tags always travel
//! as query parameters.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AlertMessage, AlertSender, SNAPSHOT_FILE_NAME};
use crate::notification::profile::ProviderKind;
use crate::{Error, Result};

/// ntfy sender configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NtfyConfig {
    /// Server base URL.
    #[serde(default = "default_server")]
    pub server: String,
    pub topic: String,
    /// Access token for protected topics.
    #[serde(default)]
    pub token: Option<String>,
    /// Message priority, 1 (min) to 5 (max).
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_server() -> String {
    "https://ntfy.sh".to_string()
}

impl Default for NtfyConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            topic: String::new(),
            token: None,
            priority: None,
            tags: Vec::new(),
        }
    }
}

/// ntfy sender.
pub struct NtfySender {
    config: NtfyConfig,
    client: Client,
}

impl NtfySender {
    pub fn new(config: NtfyConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn topic_url(&self) -> String {
        format!(
            "{}/{}",
            self.config.server.trim_end_matches('/'),
            self.config.topic.trim_start_matches('/')
        )
    }

    fn query(&self, message: &AlertMessage) -> Vec<(&'static str, String)> {
        let mut query = vec![("title", message.title.clone())];
        if let Some(url) = &message.links.review_url {
            query.push(("click", url.clone()));
        }
        if let Some(priority) = self.config.priority {
            query.push(("priority", priority.clamp(1, 5).to_string()));
        }
        if !self.config.tags.is_empty() {
            query.push(("tags", self.config.tags.join(",")));
        }
        query
    }

    fn build_request(&self, message: &AlertMessage) -> RequestBuilder {
        let mut query = self.query(message);
        let request = match &message.image {
            Some(image) => {
                query.push(("message", message.body.clone()));
                query.push(("filename", SNAPSHOT_FILE_NAME.to_string()));
                self.client.put(self.topic_url()).body(image.clone())
            }
            None => self.client.post(self.topic_url()).body(message.body.clone()),
        };

        let request = request.query(&query);
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl AlertSender for NtfySender {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Ntfy
    }

    async fn send(&self, message: &AlertMessage) -> Result<()> {
        let response = self.build_request(message).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("ntfy publish failed: {} - {}", status, body);
            return Err(Error::other(format!("ntfy publish failed: {} - {}", status, body)));
        }

        debug!(event_id = %message.event_id, topic = %self.config.topic, "ntfy alert sent");
        Ok(())
    }
}
