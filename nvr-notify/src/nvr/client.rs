//! HTTP client for the NVR's REST API.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::NvrApi;
use super::wire::EventPayload;
use crate::domain::DetectionEvent;
use crate::utils::http_client::{build_client, header_map};
use crate::{Error, Result};

/// NVR connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NvrConfig {
    /// Base URL the service uses to reach the NVR (e.g. `http://nvr.lan:5000`).
    pub server: String,
    /// Base URL used in links sent to users; defaults to `server`.
    #[serde(default)]
    pub public_url: Option<String>,
    /// Extra headers sent with every request (auth proxies and the like).
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub startup_check: StartupCheckConfig,
}

fn default_timeout_secs() -> u64 {
    10
}

impl NvrConfig {
    /// Base URL for user-facing links.
    pub fn link_base(&self) -> &str {
        self.public_url
            .as_deref()
            .unwrap_or(&self.server)
            .trim_end_matches('/')
    }
}

/// How hard to try reaching the NVR before giving up at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupCheckConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_attempts() -> u32 {
    5
}

fn default_interval_secs() -> u64 {
    30
}

impl Default for StartupCheckConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            interval_secs: default_interval_secs(),
        }
    }
}

/// `reqwest`-backed [`NvrApi`] implementation.
pub struct NvrClient {
    base: String,
    client: Client,
}

impl NvrClient {
    /// Create a new client.
    pub fn new(config: &NvrConfig) -> Result<Self> {
        let client = build_client(
            Duration::from_secs(config.timeout_secs),
            header_map(&config.headers),
        )?;
        Ok(Self {
            base: config.server.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Nvr {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl NvrApi for NvrClient {
    async fn events_after(&self, after: f64, limit: Option<u32>) -> Result<Vec<DetectionEvent>> {
        let url = self.api_url("events");
        let mut query = vec![
            ("after", after.to_string()),
            ("include_thumbnails", "0".to_string()),
        ];
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let payloads: Vec<EventPayload> = self.get_json(&url, &query).await?;
        debug!(count = payloads.len(), after, "Fetched events from NVR");
        Ok(payloads.into_iter().map(DetectionEvent::from).collect())
    }

    async fn event(&self, id: &str) -> Result<DetectionEvent> {
        let url = self.api_url(&format!("events/{}", id));
        let payload: EventPayload = self.get_json(&url, &[]).await?;
        Ok(payload.into())
    }

    async fn snapshot(&self, id: &str) -> Result<Option<Bytes>> {
        let url = self.api_url(&format!("events/{}/snapshot.jpg", id));
        let response = self.client.get(&url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(Some(response.bytes().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                debug!(event_id = %id, status = %status, "Snapshot unavailable");
                Ok(None)
            }
        }
    }

    async fn version(&self) -> Result<String> {
        let url = self.api_url("version");
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Nvr {
                status: status.as_u16(),
                url,
            });
        }
        Ok(response.text().await?.trim().to_string())
    }
}
