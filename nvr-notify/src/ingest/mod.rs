//! Event ingestion.
//!
//! Two interchangeable sources feed one downstream shape:
//! - [`PollingSource`] queries the NVR on a timer behind a watermark.
//! - [`SubscriptionSource`] holds a broker connection and receives pushed
//!   detection changes or review aggregates.
//!
//! Exactly one source runs per process. Both hand every item to an
//! [`EventSink`].

mod polling;
mod review;
mod subscription;

pub use polling::{PollingConfig, PollingSource, Watermark};
pub use review::{Resolution, ReviewResolver};
pub use subscription::{
    ConnectionState, MqttConfig, SubscriptionSource, TopicMode, decode_message,
};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::domain::{DetectionEvent, ReviewAggregate};

/// One unit of work produced by a source.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    /// A new or updated detection.
    Detection(DetectionEvent),
    /// The NVR finished tracking a detection.
    DetectionEnded(String),
    /// A review aggregate in any lifecycle stage.
    Review(ReviewAggregate),
}

impl Ingested {
    /// Identity of the detection or review this item refers to.
    pub fn id(&self) -> &str {
        match self {
            Self::Detection(event) => &event.id,
            Self::DetectionEnded(id) => id,
            Self::Review(review) => &review.id,
        }
    }
}

/// Consumer of ingested items.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Process one item. Errors are contained by the sink.
    async fn accept(&self, item: Ingested);
}

/// A producer of ingested items.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Run until `cancel` fires.
    ///
    /// Returns an error only for conditions that must stop the process.
    async fn run(&self, sink: Arc<dyn EventSink>, cancel: CancellationToken) -> Result<()>;
}

/// Which source to run, tagged by `mode`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum IngestConfig {
    Polling(PollingConfig),
    Subscription(MqttConfig),
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::Polling(PollingConfig::default())
    }
}
