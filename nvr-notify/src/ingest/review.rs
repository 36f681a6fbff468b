//! Review resolution.
//!
//! Expands a review aggregate into its detections, vetoes the whole review if
//! any detection fails the filter, and picks the representative detection the
//! alert is built from.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dedup::ZoneDedupCache;
use crate::domain::filter::{DropReason, FilterDecision, FilterEngine};
use crate::domain::{DetectionEvent, ReviewAggregate, ReviewType, Severity};
use crate::nvr::NvrApi;

/// What became of a review.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Every fetched detection passed. `representative` is the first one fetched.
    Alert {
        representative: DetectionEvent,
        detections: Vec<DetectionEvent>,
    },
    /// A detection failed the filter; the review is vetoed.
    Dropped {
        detection: String,
        reason: DropReason,
    },
    /// Detection-severity review while detection alerts are disabled.
    SeverityGated,
    /// The review ended; dedup entries for it and its detections were cleared.
    Ended,
    /// An update that is not acted on.
    Ignored,
    /// No detection could be fetched.
    Unresolved,
}

/// Turns review aggregates into alert decisions.
pub struct ReviewResolver {
    api: Arc<dyn NvrApi>,
    filter: Arc<FilterEngine>,
    dedup: Option<Arc<ZoneDedupCache>>,
    notify_detections: bool,
}

impl ReviewResolver {
    pub fn new(
        api: Arc<dyn NvrApi>,
        filter: Arc<FilterEngine>,
        dedup: Option<Arc<ZoneDedupCache>>,
        notify_detections: bool,
    ) -> Self {
        Self {
            api,
            filter,
            dedup,
            notify_detections,
        }
    }

    /// Resolve one review.
    pub async fn resolve(&self, review: &ReviewAggregate) -> Resolution {
        match review.kind {
            ReviewType::End => {
                self.clear(review);
                return Resolution::Ended;
            }
            // Updates only matter when the cache can tell a new zone from a repeat.
            ReviewType::Update if self.dedup.is_none() => return Resolution::Ignored,
            ReviewType::New | ReviewType::Update => {}
        }

        if review.severity == Severity::Detection && !self.notify_detections {
            debug!(review_id = %review.id, "Detection-level review skipped");
            return Resolution::SeverityGated;
        }

        let mut detections: Vec<DetectionEvent> = Vec::with_capacity(review.detections.len());
        for id in &review.detections {
            let detection = match self.api.event(id).await {
                Ok(detection) => detection,
                Err(e) => {
                    warn!(
                        review_id = %review.id,
                        detection_id = %id,
                        error = %e,
                        "Failed to fetch detection"
                    );
                    continue;
                }
            };

            if let FilterDecision::Drop(reason) = self.filter.evaluate(&detection) {
                info!(
                    review_id = %review.id,
                    detection_id = %id,
                    camera = %detection.camera,
                    stage = %reason.stage(),
                    reason = %reason,
                    "Review dropped by filter"
                );
                return Resolution::Dropped {
                    detection: id.clone(),
                    reason,
                };
            }
            detections.push(detection);
        }

        if detections.is_empty() {
            debug!(review_id = %review.id, "No detection could be resolved");
            return Resolution::Unresolved;
        }

        let representative = detections[0].clone();
        Resolution::Alert {
            representative,
            detections,
        }
    }

    fn clear(&self, review: &ReviewAggregate) {
        if let Some(dedup) = &self.dedup {
            dedup.del_zone_alerted(&review.id);
            for id in &review.detections {
                dedup.del_zone_alerted(id);
            }
            debug!(review_id = %review.id, count = review.detections.len(), "Review ended");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::filter::{AlertRules, ListRule};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::{BTreeSet, HashMap};

    #[derive(Default)]
    struct FakeNvr {
        events: HashMap<String, DetectionEvent>,
        fetched: Mutex<Vec<String>>,
    }

    impl FakeNvr {
        fn with(events: Vec<DetectionEvent>) -> Self {
            Self {
                events: events.into_iter().map(|e| (e.id.clone(), e)).collect(),
                fetched: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NvrApi for FakeNvr {
        async fn events_after(
            &self,
            _after: f64,
            _limit: Option<u32>,
        ) -> Result<Vec<DetectionEvent>> {
            Ok(vec![])
        }

        async fn event(&self, id: &str) -> Result<DetectionEvent> {
            self.fetched.lock().push(id.to_string());
            self.events.get(id).cloned().ok_or_else(|| Error::Nvr {
                status: 404,
                url: format!("http://nvr/api/events/{id}"),
            })
        }

        async fn snapshot(&self, _id: &str) -> Result<Option<Bytes>> {
            Ok(None)
        }

        async fn version(&self) -> Result<String> {
            Ok("test".to_string())
        }
    }

    fn detection(id: &str, label: &str) -> DetectionEvent {
        DetectionEvent::new(id, "front", label, 0.9, 1.0).with_zones(["porch"])
    }

    fn review(kind: ReviewType, severity: Severity, ids: &[&str]) -> ReviewAggregate {
        ReviewAggregate {
            id: "r1".to_string(),
            camera: "front".to_string(),
            kind,
            severity,
            detections: ids.iter().map(|s| s.to_string()).collect(),
            start_time: 1.0,
        }
    }

    fn block_cats() -> Arc<FilterEngine> {
        Arc::new(FilterEngine::new(AlertRules {
            labels: ListRule::new(vec![], vec!["cat".to_string()]),
            ..Default::default()
        }))
    }

    fn resolver(
        nvr: Arc<FakeNvr>,
        dedup: Option<Arc<ZoneDedupCache>>,
        notify_detections: bool,
    ) -> ReviewResolver {
        ReviewResolver::new(nvr, block_cats(), dedup, notify_detections)
    }

    #[tokio::test]
    async fn test_one_failing_detection_vetoes_review() {
        let nvr = Arc::new(FakeNvr::with(vec![
            detection("d1", "person"),
            detection("d2", "cat"),
            detection("d3", "person"),
        ]));
        let resolver = resolver(nvr.clone(), None, true);

        let result = resolver
            .resolve(&review(ReviewType::New, Severity::Alert, &["d1", "d2", "d3"]))
            .await;

        match result {
            Resolution::Dropped { detection, reason } => {
                assert_eq!(detection, "d2");
                assert_eq!(reason, DropReason::BlockedLabel { label: "cat".to_string() });
            }
            other => panic!("unexpected resolution: {:?}", other),
        }
        // Iteration stops at the first drop.
        assert_eq!(*nvr.fetched.lock(), vec!["d1", "d2"]);
    }

    #[tokio::test]
    async fn test_first_detection_is_representative() {
        let nvr = Arc::new(FakeNvr::with(vec![detection("d1", "person"), detection("d2", "car")]));
        let resolver = resolver(nvr, None, true);

        match resolver
            .resolve(&review(ReviewType::New, Severity::Alert, &["d1", "d2"]))
            .await
        {
            Resolution::Alert {
                representative,
                detections,
            } => {
                assert_eq!(representative.id, "d1");
                assert_eq!(detections.len(), 2);
            }
            other => panic!("unexpected resolution: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_detection() {
        let nvr = Arc::new(FakeNvr::with(vec![detection("d2", "person")]));
        let resolver = resolver(nvr, None, true);

        match resolver
            .resolve(&review(ReviewType::New, Severity::Alert, &["missing", "d2"]))
            .await
        {
            Resolution::Alert { representative, .. } => assert_eq!(representative.id, "d2"),
            other => panic!("unexpected resolution: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nothing_fetched_is_unresolved() {
        let nvr = Arc::new(FakeNvr::default());
        let resolver = resolver(nvr, None, true);

        let result = resolver
            .resolve(&review(ReviewType::New, Severity::Alert, &["x", "y"]))
            .await;
        assert_eq!(result, Resolution::Unresolved);
    }

    #[tokio::test]
    async fn test_severity_gate_skips_fetches() {
        let nvr = Arc::new(FakeNvr::with(vec![detection("d1", "person")]));
        let resolver = resolver(nvr.clone(), None, false);

        let result = resolver
            .resolve(&review(ReviewType::New, Severity::Detection, &["d1"]))
            .await;
        assert_eq!(result, Resolution::SeverityGated);
        assert!(nvr.fetched.lock().is_empty());

        let result = resolver
            .resolve(&review(ReviewType::New, Severity::Alert, &["d1"]))
            .await;
        assert!(matches!(result, Resolution::Alert { .. }));
    }

    #[tokio::test]
    async fn test_end_clears_every_detection() {
        let cache = Arc::new(ZoneDedupCache::new());
        let zones: BTreeSet<String> = ["porch".to_string()].into_iter().collect();
        cache.zone_already_alerted("r1", &zones);
        cache.zone_already_alerted("d1", &zones);
        cache.zone_already_alerted("d2", &zones);
        let nvr = Arc::new(FakeNvr::default());
        let resolver = resolver(nvr.clone(), Some(cache.clone()), true);

        let result = resolver
            .resolve(&review(ReviewType::End, Severity::Alert, &["d1", "d2"]))
            .await;

        assert_eq!(result, Resolution::Ended);
        assert!(cache.zones_for("r1").is_none());
        assert!(cache.zones_for("d1").is_none());
        assert!(cache.zones_for("d2").is_none());
        assert!(nvr.fetched.lock().is_empty());
    }

    #[tokio::test]
    async fn test_updates_need_dedup() {
        let nvr = Arc::new(FakeNvr::with(vec![detection("d1", "person")]));

        let without = resolver(nvr.clone(), None, true);
        let result = without
            .resolve(&review(ReviewType::Update, Severity::Alert, &["d1"]))
            .await;
        assert_eq!(result, Resolution::Ignored);

        let with = resolver(nvr, Some(Arc::new(ZoneDedupCache::new())), true);
        let result = with
            .resolve(&review(ReviewType::Update, Severity::Alert, &["d1"]))
            .await;
        assert!(matches!(result, Resolution::Alert { .. }));
    }
}
