//! Event processing pipeline.
//!
//! [`EventProcessor`] is the [`EventSink`] every source feeds. For each item it
//! runs the global filter (or review resolution), consults the zone dedup
//! cache, derives links, fetches the snapshot once and hands the alert to the
//! dispatcher.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::dedup::ZoneDedupCache;
use crate::domain::filter::{FilterDecision, FilterEngine};
use crate::domain::{DetectionEvent, EventLinks, ReviewAggregate};
use crate::ingest::{EventSink, Ingested, Resolution, ReviewResolver};
use crate::notification::{Alert, DispatchReport, Dispatcher};
use crate::nvr::NvrApi;
use crate::status::StatusSink;

/// Build user-facing links for an alert.
///
/// Review alerts link to the review page, plain detections to the explore
/// view. The clip link is only set when the NVR recorded a clip.
pub fn derive_links(base: &str, event: &DetectionEvent, review_id: Option<&str>) -> EventLinks {
    let base = base.trim_end_matches('/');
    let review_url = match review_id {
        Some(review) => format!("{}/review?id={}", base, review),
        None => format!("{}/explore?event_id={}", base, event.id),
    };
    let clip_url = event
        .has_clip
        .then(|| format!("{}/api/events/{}/clip.mp4", base, event.id));

    EventLinks {
        review_url: Some(review_url),
        clip_url,
    }
}

/// Joins filtering, dedup and dispatch behind the [`EventSink`] interface.
pub struct EventProcessor {
    api: Arc<dyn NvrApi>,
    filter: Arc<FilterEngine>,
    dedup: Option<Arc<ZoneDedupCache>>,
    resolver: ReviewResolver,
    dispatcher: Arc<Dispatcher>,
    status: Arc<dyn StatusSink>,
    link_base: Option<String>,
}

impl EventProcessor {
    pub fn new(
        api: Arc<dyn NvrApi>,
        filter: Arc<FilterEngine>,
        dedup: Option<Arc<ZoneDedupCache>>,
        dispatcher: Arc<Dispatcher>,
        status: Arc<dyn StatusSink>,
        notify_detections: bool,
    ) -> Self {
        let resolver =
            ReviewResolver::new(api.clone(), filter.clone(), dedup.clone(), notify_detections);
        Self {
            api,
            filter,
            dedup,
            resolver,
            dispatcher,
            status,
            link_base: None,
        }
    }

    /// Base URL used for alert links.
    pub fn with_link_base(mut self, base: impl Into<String>) -> Self {
        self.link_base = Some(base.into());
        self
    }

    /// Process one detection. Returns the dispatch report when an alert went out.
    pub async fn handle_detection(&self, event: DetectionEvent) -> Option<DispatchReport> {
        self.status.record_event_seen(Utc::now());

        if let FilterDecision::Drop(reason) = self.filter.evaluate(&event) {
            info!(
                event_id = %event.id,
                camera = %event.camera,
                label = %event.label,
                stage = %reason.stage(),
                reason = %reason,
                "Detection dropped by filter"
            );
            return None;
        }

        if self.already_alerted(&event.id, &event.zones) {
            return None;
        }

        let event = self.with_links(event, None);
        Some(self.send(Alert::single(event)).await)
    }

    /// Process one review aggregate. Returns the dispatch report when an alert went out.
    pub async fn handle_review(&self, review: ReviewAggregate) -> Option<DispatchReport> {
        self.status.record_event_seen(Utc::now());

        let (representative, detections) = match self.resolver.resolve(&review).await {
            Resolution::Alert {
                representative,
                detections,
            } => (representative, detections),
            resolution => {
                debug!(
                    review_id = %review.id,
                    resolution = ?resolution,
                    "Review produced no alert"
                );
                return None;
            }
        };

        let zones: BTreeSet<String> = detections
            .iter()
            .flat_map(|d| d.zones.iter().cloned())
            .collect();
        // Keyed by review so a detection that failed to fetch earlier cannot
        // change the key between new and update messages.
        if self.already_alerted(&review.id, &zones) {
            return None;
        }

        let event = self.with_links(representative, Some(&review.id));
        let alert = Alert {
            event,
            detections,
            severity: Some(review.severity),
            snapshot: None,
        };
        Some(self.send(alert).await)
    }

    /// Forget dedup state for a finished detection.
    pub fn handle_ended(&self, id: &str) {
        if let Some(dedup) = &self.dedup {
            dedup.del_zone_alerted(id);
        }
    }

    fn already_alerted(&self, id: &str, zones: &BTreeSet<String>) -> bool {
        let Some(dedup) = &self.dedup else {
            return false;
        };
        let repeat = dedup.zone_already_alerted(id, zones);
        if repeat {
            debug!(event_id = %id, "Zones already alerted, suppressing");
        }
        repeat
    }

    fn with_links(&self, event: DetectionEvent, review_id: Option<&str>) -> DetectionEvent {
        match &self.link_base {
            Some(base) => {
                let links = derive_links(base, &event, review_id);
                event.with_links(links)
            }
            None => event,
        }
    }

    async fn fetch_snapshot(&self, event: &DetectionEvent) -> Option<Bytes> {
        if !event.has_snapshot {
            return None;
        }
        match self.api.snapshot(&event.id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    event_id = %event.id,
                    error = %e,
                    "Failed to fetch snapshot, sending without it"
                );
                None
            }
        }
    }

    async fn send(&self, alert: Alert) -> DispatchReport {
        let snapshot = self.fetch_snapshot(&alert.event).await;
        let alert = alert.with_snapshot(snapshot);
        let report = self.dispatcher.dispatch(&alert).await;
        self.status.record_alert_seen(Utc::now());
        report
    }
}

#[async_trait]
impl EventSink for EventProcessor {
    async fn accept(&self, item: Ingested) {
        match item {
            Ingested::Detection(event) => {
                self.handle_detection(event).await;
            }
            Ingested::DetectionEnded(id) => self.handle_ended(&id),
            Ingested::Review(review) => {
                self.handle_review(review).await;
            }
        }
    }
}
