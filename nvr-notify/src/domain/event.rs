//! Detection and review events as seen by the alerting pipeline.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Links derived from the NVR's public address for a single alert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLinks {
    /// Page where the activity can be reviewed.
    pub review_url: Option<String>,
    /// Direct link to the recorded clip.
    pub clip_url: Option<String>,
}

/// A single labeled object sighting, normalized from either ingestion path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Stable identity of the physical detection.
    pub id: String,
    pub camera: String,
    /// Primary label (e.g. `person`, `car`).
    pub label: String,
    /// Sub-labels in the order the NVR reported them.
    #[serde(default)]
    pub sub_labels: Vec<String>,
    /// Top score as reported, either a 0-1 fraction or a 0-100 percentage.
    pub score: f64,
    /// Start time in fractional unix seconds.
    pub start_time: f64,
    /// Zones the object is currently in.
    #[serde(default)]
    pub zones: BTreeSet<String>,
    #[serde(default)]
    pub has_snapshot: bool,
    #[serde(default)]
    pub has_clip: bool,
    #[serde(default)]
    pub links: EventLinks,
}

impl DetectionEvent {
    /// Create an event with the required attributes; everything else empty.
    pub fn new(
        id: impl Into<String>,
        camera: impl Into<String>,
        label: impl Into<String>,
        score: f64,
        start_time: f64,
    ) -> Self {
        Self {
            id: id.into(),
            camera: camera.into(),
            label: label.into(),
            sub_labels: Vec::new(),
            score,
            start_time,
            zones: BTreeSet::new(),
            has_snapshot: false,
            has_clip: false,
            links: EventLinks::default(),
        }
    }

    /// Set the zones.
    pub fn with_zones<I, S>(mut self, zones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.zones = zones.into_iter().map(Into::into).collect();
        self
    }

    /// Set the sub-labels.
    pub fn with_sub_labels<I, S>(mut self, sub_labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sub_labels = sub_labels.into_iter().map(Into::into).collect();
        self
    }

    /// Set the media availability flags.
    pub fn with_media(mut self, has_snapshot: bool, has_clip: bool) -> Self {
        self.has_snapshot = has_snapshot;
        self.has_clip = has_clip;
        self
    }

    /// Attach derived links. Links already present are kept.
    pub fn with_links(mut self, links: EventLinks) -> Self {
        if self.links.review_url.is_none() {
            self.links.review_url = links.review_url;
        }
        if self.links.clip_url.is_none() {
            self.links.clip_url = links.clip_url;
        }
        self
    }

    /// Score on a 0-100 scale.
    ///
    /// Values at or below 1.0 are treated as fractions.
    pub fn normalized_score(&self) -> f64 {
        normalize_score(self.score)
    }

    /// Start time as a UTC timestamp.
    pub fn started_at(&self) -> DateTime<Utc> {
        unix_to_datetime(self.start_time)
    }

    /// Whether the score reaches `min_score` (0-100 scale), inclusively.
    ///
    /// Fractions are compared against `min_score / 100` so that a reported
    /// `0.57` meets a minimum of `57` exactly.
    pub fn meets_min_score(&self, min_score: f64) -> bool {
        if self.score <= 1.0 {
            self.score >= min_score / 100.0
        } else {
            self.score >= min_score
        }
    }

    /// Sub-labels joined for display.
    pub fn sub_label_text(&self) -> String {
        self.sub_labels.join(", ")
    }

    /// Zones joined for display.
    pub fn zone_text(&self) -> String {
        self.zones.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Normalize a score to a 0-100 scale.
pub fn normalize_score(score: f64) -> f64 {
    if score <= 1.0 { score * 100.0 } else { score }
}

/// Convert fractional unix seconds to a UTC timestamp, clamping garbage to the epoch.
pub fn unix_to_datetime(secs: f64) -> DateTime<Utc> {
    let millis = (secs * 1000.0).round() as i64;
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}

/// Lifecycle stage of a review aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReviewType {
    New,
    Update,
    End,
}

/// Review severity as assigned by the NVR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Alert,
    Detection,
}

/// A group of detections describing one continuous activity span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewAggregate {
    pub id: String,
    pub camera: String,
    pub kind: ReviewType,
    pub severity: Severity,
    /// Identities of the detections in this review, in NVR order.
    pub detections: Vec<String>,
    pub start_time: f64,
}
