//! Uptime heartbeat.
//!
//! Periodically pings an uptime-monitor URL so an external monitor notices
//! when the service stops.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    60
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            interval_secs: default_interval_secs(),
        }
    }
}

pub struct Heartbeat {
    url: String,
    interval: Duration,
    client: Client,
}

impl Heartbeat {
    /// Create a heartbeat when enabled and a URL is configured.
    pub fn from_config(config: &HeartbeatConfig, client: Client) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let url = config.url.clone()?;
        Some(Self {
            url,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            client,
        })
    }

    /// Send one ping.
    pub async fn ping(&self) -> Result<()> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::other(format!("heartbeat returned {}", status)));
        }
        Ok(())
    }

    /// Ping on every interval until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Heartbeat shutting down");
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.ping().await {
                Ok(()) => debug!("Heartbeat sent"),
                Err(e) => warn!(error = %e, "Heartbeat failed"),
            }
        }
    }
}
