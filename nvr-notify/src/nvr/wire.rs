//! JSON payloads exchanged with the NVR, and their conversion into domain events.
//!
//! The NVR is loose with its shapes: scores may live at the top level or under
//! `data`, sub-labels arrive as `null`, a string, a `[name, score]` pair or a
//! list of names, and zones are called `zones`, `current_zones` or
//! `entered_zones` depending on the endpoint.

use serde::Deserialize;
use serde_json::Value;

use crate::Result;
use crate::domain::{DetectionEvent, ReviewAggregate, ReviewType, Severity};

/// A detection as returned by `/api/events` or carried in an event message.
#[derive(Debug, Clone, Deserialize)]
pub struct EventPayload {
    pub id: String,
    pub camera: String,
    pub label: String,
    #[serde(default)]
    pub sub_label: Value,
    #[serde(default)]
    pub top_score: Option<f64>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub data: Option<EventData>,
    pub start_time: f64,
    #[serde(default)]
    pub zones: Option<Vec<String>>,
    #[serde(default)]
    pub current_zones: Option<Vec<String>>,
    #[serde(default)]
    pub entered_zones: Option<Vec<String>>,
    #[serde(default)]
    pub has_snapshot: bool,
    #[serde(default)]
    pub has_clip: bool,
}

/// Nested detection data block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub top_score: Option<f64>,
    #[serde(default)]
    pub score: Option<f64>,
}

impl EventPayload {
    fn best_score(&self) -> f64 {
        let data = self.data.as_ref();
        self.top_score
            .or_else(|| data.and_then(|d| d.top_score))
            .or(self.score)
            .or_else(|| data.and_then(|d| d.score))
            .unwrap_or(0.0)
    }

    fn current_zone_list(&self) -> Vec<String> {
        self.current_zones
            .clone()
            .or_else(|| self.zones.clone())
            .or_else(|| self.entered_zones.clone())
            .unwrap_or_default()
    }
}

impl From<EventPayload> for DetectionEvent {
    fn from(payload: EventPayload) -> Self {
        let score = payload.best_score();
        let zones = payload.current_zone_list();
        let sub_labels = parse_sub_labels(&payload.sub_label);

        DetectionEvent::new(
            payload.id,
            payload.camera,
            payload.label,
            score,
            payload.start_time,
        )
        .with_zones(zones)
        .with_sub_labels(sub_labels)
        .with_media(payload.has_snapshot, payload.has_clip)
    }
}

/// Extract sub-label names from any of the shapes the NVR uses.
pub fn parse_sub_labels(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        Value::Array(items) => match items.as_slice() {
            // `[name, score]` pair
            [Value::String(name), Value::Number(_)] => vec![name.clone()],
            _ => items
                .iter()
                .filter_map(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        },
        _ => Vec::new(),
    }
}

/// Lifecycle marker on event messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    New,
    Update,
    End,
}

/// Message published on the `events` topic.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionChange {
    #[serde(rename = "type")]
    pub kind: ChangeType,
    #[serde(default)]
    pub before: Option<EventPayload>,
    pub after: EventPayload,
}

/// Review body carried in `before`/`after` on the `reviews` topic.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewPayload {
    pub id: String,
    pub camera: String,
    pub severity: Severity,
    pub start_time: f64,
    #[serde(default)]
    pub data: ReviewData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewData {
    #[serde(default)]
    pub detections: Vec<String>,
    #[serde(default)]
    pub objects: Vec<String>,
    #[serde(default)]
    pub zones: Vec<String>,
}

/// Message published on the `reviews` topic.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewEnvelope {
    #[serde(rename = "type")]
    pub kind: ReviewType,
    #[serde(default)]
    pub before: Option<ReviewPayload>,
    pub after: ReviewPayload,
}

impl ReviewEnvelope {
    pub fn into_aggregate(self) -> ReviewAggregate {
        let after = self.after;
        ReviewAggregate {
            id: after.id,
            camera: after.camera,
            kind: self.kind,
            severity: after.severity,
            detections: after.data.detections,
            start_time: after.start_time,
        }
    }
}

/// Decode an `events` topic message.
pub fn decode_detection_change(payload: &[u8]) -> Result<DetectionChange> {
    Ok(serde_json::from_slice(payload)?)
}

/// Decode a `reviews` topic message.
pub fn decode_review(payload: &[u8]) -> Result<ReviewAggregate> {
    let envelope: ReviewEnvelope = serde_json::from_slice(payload)?;
    Ok(envelope.into_aggregate())
}
