//! Interval polling of the NVR's event list.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{EventSink, EventSource, Ingested};
use crate::Result;
use crate::nvr::NvrApi;

/// Polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Always fetch the single most recent event, ignoring the watermark.
    /// Meant for connectivity checks.
    #[serde(default)]
    pub latest_only: bool,
}

fn default_interval_secs() -> u64 {
    30
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            latest_only: false,
        }
    }
}

/// Highest start time already handed downstream.
///
/// Owned by the polling loop alone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Watermark {
    last_seen: f64,
}

impl Watermark {
    pub fn new(start: f64) -> Self {
        Self { last_seen: start }
    }

    /// A watermark at the current wall-clock time.
    pub fn now() -> Self {
        Self::new(Utc::now().timestamp_millis() as f64 / 1000.0)
    }

    pub fn get(&self) -> f64 {
        self.last_seen
    }

    /// Move forward to `start_time` if it is newer. Returns whether it moved.
    pub fn advance(&mut self, start_time: f64) -> bool {
        if start_time > self.last_seen {
            self.last_seen = start_time;
            true
        } else {
            false
        }
    }
}

/// Timer-driven [`EventSource`].
pub struct PollingSource {
    api: Arc<dyn NvrApi>,
    config: PollingConfig,
}

impl PollingSource {
    pub fn new(api: Arc<dyn NvrApi>, config: PollingConfig) -> Self {
        Self { api, config }
    }

    /// Run a single tick.
    ///
    /// Events are emitted one at a time in ascending start-time order, and the
    /// watermark is advanced before each one is emitted. On a query failure the
    /// watermark is left untouched so the next tick covers the same window.
    pub async fn poll_once(
        &self,
        watermark: &mut Watermark,
        sink: &dyn EventSink,
    ) -> Result<usize> {
        let (after, limit) = if self.config.latest_only {
            (0.0, Some(1))
        } else {
            (watermark.get(), None)
        };

        let mut events = self.api.events_after(after, limit).await?;
        events.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

        let count = events.len();
        for event in events {
            watermark.advance(event.start_time);
            sink.accept(Ingested::Detection(event)).await;
        }

        if count > 0 {
            debug!(count, watermark = watermark.get(), "Processed polled events");
        }
        Ok(count)
    }
}

#[async_trait]
impl EventSource for PollingSource {
    fn name(&self) -> &'static str {
        "polling"
    }

    async fn run(&self, sink: Arc<dyn EventSink>, cancel: CancellationToken) -> Result<()> {
        let mut watermark = Watermark::now();
        let period = Duration::from_secs(self.config.interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.interval_secs,
            latest_only = self.config.latest_only,
            "Polling NVR for events"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Polling source shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            match self.poll_once(&mut watermark, sink.as_ref()).await {
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    warn!(error = %e, after = watermark.get(), "NVR unavailable, retrying");
                }
                Err(e) => {
                    error!(error = %e, after = watermark.get(), "Event poll failed, retrying");
                }
            }
        }
    }
}
