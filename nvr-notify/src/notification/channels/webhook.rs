//! Generic webhook sender.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{AlertMessage, AlertSender};
use crate::notification::profile::ProviderKind;
use crate::utils::http_client::header_map;
use crate::{Error, Result};

/// Webhook sender configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Webhook URL.
    pub url: String,
    /// HTTP method (default: POST).
    #[serde(default = "default_method")]
    pub method: String,
    /// Custom headers.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Authentication type.
    #[serde(default)]
    pub auth: Option<WebhookAuth>,
    /// Embed the snapshot as base64 in the payload.
    #[serde(default)]
    pub include_image: bool,
}

fn default_method() -> String {
    "POST".to_string()
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: default_method(),
            headers: Vec::new(),
            auth: None,
            include_image: false,
        }
    }
}

/// Webhook authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WebhookAuth {
    /// Bearer token authentication.
    Bearer { token: String },
    /// Basic authentication.
    Basic { username: String, password: String },
    /// Custom header authentication.
    Header { name: String, value: String },
}

/// Generic webhook sender.
pub struct WebhookSender {
    config: WebhookConfig,
    client: Client,
}

impl WebhookSender {
    pub fn new(config: WebhookConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn method(&self) -> Method {
        match self.config.method.to_uppercase().as_str() {
            "PUT" => Method::PUT,
            "PATCH" => Method::PATCH,
            _ => Method::POST,
        }
    }

    /// Build the request headers.
    fn build_headers(&self) -> HeaderMap {
        let mut headers = header_map(&self.config.headers);

        match &self.config.auth {
            Some(WebhookAuth::Bearer { token }) => {
                if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                    headers.insert(AUTHORIZATION, value);
                }
            }
            Some(WebhookAuth::Header { name, value }) => {
                if let (Ok(name), Ok(value)) =
                    (name.parse::<HeaderName>(), value.parse::<HeaderValue>())
                {
                    headers.insert(name, value);
                }
            }
            // Basic auth is handled in the request builder
            Some(WebhookAuth::Basic { .. }) | None => {}
        }

        headers
    }

    /// Build the JSON payload.
    fn build_payload(&self, message: &AlertMessage) -> serde_json::Value {
        let mut payload = json!({
            "title": message.title,
            "body": message.body,
            "event_id": message.event_id,
            "camera": message.camera,
            "label": message.label,
            "timestamp": message.timestamp.to_rfc3339(),
            "review_url": message.links.review_url,
            "clip_url": message.links.clip_url,
            "context": message.context,
        });

        if self.config.include_image
            && let Some(image) = &message.image
        {
            payload["image"] = json!(STANDARD.encode(image));
        }
        payload
    }
}

#[async_trait]
impl AlertSender for WebhookSender {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Webhook
    }

    async fn send(&self, message: &AlertMessage) -> Result<()> {
        let mut request = self
            .client
            .request(self.method(), &self.config.url)
            .headers(self.build_headers())
            .json(&self.build_payload(message));

        if let Some(WebhookAuth::Basic { username, password }) = &self.config.auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Webhook failed: {} - {}", status, body);
            return Err(Error::other(format!("Webhook failed: {} - {}", status, body)));
        }

        debug!(event_id = %message.event_id, "Webhook alert sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::channels::test_support::{client, message};
    use bytes::Bytes;

    fn sender(config: WebhookConfig) -> WebhookSender {
        WebhookSender::new(config, client())
    }

    #[test]
    fn test_webhook_config_defaults() {
        let config: WebhookConfig = serde_json::from_str(r#"{"url":"https://hook"}"#).unwrap();
        assert_eq!(config.method, "POST");
        assert!(config.auth.is_none());
        assert!(!config.include_image);
    }

    #[test]
    fn test_build_headers_with_auth() {
        let sender = sender(WebhookConfig {
            url: "https://hook".to_string(),
            headers: vec![("X-Source".to_string(), "nvr".to_string())],
            auth: Some(WebhookAuth::Bearer {
                token: "secret".to_string(),
            }),
            ..Default::default()
        });

        let headers = sender.build_headers();
        assert_eq!(headers["x-source"], "nvr");
        assert_eq!(headers[AUTHORIZATION], "Bearer secret");
    }

    #[test]
    fn test_auth_config_shape() {
        let auth: WebhookAuth =
            serde_json::from_str(r#"{"type":"header","name":"X-Key","value":"k"}"#).unwrap();
        assert!(matches!(auth, WebhookAuth::Header { .. }));
    }

    #[test]
    fn test_payload_image_only_when_enabled() {
        let mut msg = message();
        msg.image = Some(Bytes::from_static(b"abc"));

        let plain = sender(WebhookConfig::default()).build_payload(&msg);
        assert!(plain.get("image").is_none());
        assert_eq!(plain["review_url"], "https://nvr.example.com/review?id=r1");
        assert!(plain["clip_url"].is_null());

        let with_image = sender(WebhookConfig {
            include_image: true,
            ..Default::default()
        })
        .build_payload(&msg);
        assert_eq!(with_image["image"], "YWJj");
    }

    #[test]
    fn test_method_selection() {
        let put = sender(WebhookConfig {
            method: "put".to_string(),
            ..Default::default()
        });
        assert_eq!(put.method(), Method::PUT);
        assert_eq!(sender(WebhookConfig::default()).method(), Method::POST);
    }
}
