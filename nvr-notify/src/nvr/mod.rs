//! NVR query interface.

mod client;
pub mod wire;

pub use client::{NvrClient, NvrConfig, StartupCheckConfig};

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::DetectionEvent;
use crate::{Error, Result};

/// Read-only access to the NVR's event API.
#[async_trait]
pub trait NvrApi: Send + Sync {
    /// Detections that started strictly after `after` (unix seconds).
    ///
    /// With `limit` set, only the most recent `limit` detections are returned.
    async fn events_after(&self, after: f64, limit: Option<u32>) -> Result<Vec<DetectionEvent>>;

    /// A single detection by identity.
    async fn event(&self, id: &str) -> Result<DetectionEvent>;

    /// The detection's snapshot image, or `None` when the NVR has none.
    async fn snapshot(&self, id: &str) -> Result<Option<Bytes>>;

    /// NVR version string, used as a connectivity probe.
    async fn version(&self) -> Result<String>;
}

/// Probe the NVR until it answers, retrying with a fixed delay.
///
/// Returns the NVR version. Exhausting every attempt is an error; callers
/// treat it as fatal during startup.
pub async fn wait_until_reachable(
    api: &dyn NvrApi,
    check: &StartupCheckConfig,
    cancel: &CancellationToken,
) -> Result<String> {
    let attempts = check.attempts.max(1);
    let interval = Duration::from_secs(check.interval_secs);

    for attempt in 1..=attempts {
        match api.version().await {
            Ok(version) => {
                info!(version = %version, "Connected to NVR");
                return Ok(version);
            }
            Err(e) => {
                warn!(attempt, attempts, error = %e, "NVR not reachable");
            }
        }

        if attempt < attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::other("startup cancelled")),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    Err(Error::other(format!(
        "NVR unreachable after {} attempts",
        attempts
    )))
}
