//! Integration tests for the alerting pipeline.
//!
//! These tests drive [`EventProcessor`] end to end with an in-memory NVR and
//! recording senders, and check what reaches each profile and the status
//! reporter.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use nvr_notify::dedup::ZoneDedupCache;
use nvr_notify::domain::filter::{AlertRules, FilterEngine, ListRule};
use nvr_notify::domain::{DetectionEvent, ReviewAggregate, ReviewType, Severity};
use nvr_notify::ingest::{EventSink, Ingested, PollingConfig, PollingSource, Watermark};
use nvr_notify::notification::{
    AlertMessage, AlertSender, Dispatcher, NotificationProfile, ProfileConfig, ProfileFilter,
    ProfileKey, ProviderKind,
};
use nvr_notify::nvr::NvrApi;
use nvr_notify::pipeline::EventProcessor;
use nvr_notify::status::{HealthStatus, StatusReporter, StatusSink};
use nvr_notify::{Error, Result};

/// In-memory NVR.
#[derive(Default)]
struct FakeNvr {
    events: Mutex<HashMap<String, DetectionEvent>>,
    snapshot_calls: AtomicU32,
}

impl FakeNvr {
    fn with_events(events: Vec<DetectionEvent>) -> Arc<Self> {
        let nvr = Self::default();
        {
            let mut map = nvr.events.lock();
            for event in events {
                map.insert(event.id.clone(), event);
            }
        }
        Arc::new(nvr)
    }
}

#[async_trait]
impl NvrApi for FakeNvr {
    async fn events_after(&self, after: f64, _limit: Option<u32>) -> Result<Vec<DetectionEvent>> {
        Ok(self
            .events
            .lock()
            .values()
            .filter(|e| e.start_time > after)
            .cloned()
            .collect())
    }

    async fn event(&self, id: &str) -> Result<DetectionEvent> {
        self.events.lock().get(id).cloned().ok_or(Error::Nvr {
            status: 404,
            url: format!("/api/events/{}", id),
        })
    }

    async fn snapshot(&self, _id: &str) -> Result<Option<Bytes>> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Bytes::from_static(b"\xff\xd8jpeg")))
    }

    async fn version(&self) -> Result<String> {
        Ok("0.14.1".to_string())
    }
}

/// Sender that records messages and optionally fails.
struct RecordingSender {
    fail: bool,
    messages: Mutex<Vec<AlertMessage>>,
}

impl RecordingSender {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            messages: Mutex::new(Vec::new()),
        })
    }

    fn count(&self) -> usize {
        self.messages.lock().len()
    }
}

#[async_trait]
impl AlertSender for RecordingSender {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Webhook
    }

    async fn send(&self, message: &AlertMessage) -> Result<()> {
        self.messages.lock().push(message.clone());
        if self.fail {
            Err(Error::other("HTTP 502"))
        } else {
            Ok(())
        }
    }
}

fn profile(index: usize, sender: Arc<RecordingSender>) -> NotificationProfile {
    let config = ProfileConfig {
        enabled: true,
        name: None,
        filters: ProfileFilter::default(),
        template: None,
        settings: (),
    };
    NotificationProfile::from_config(ProfileKey::new(ProviderKind::Webhook, index), &config, sender)
        .expect("valid profile")
}

fn key(index: usize) -> ProfileKey {
    ProfileKey::new(ProviderKind::Webhook, index)
}

/// Rules that block cars and keep everything else.
fn rules() -> AlertRules {
    AlertRules {
        labels: ListRule::new(Vec::new(), vec!["car".to_string()]),
        ..AlertRules::default()
    }
}

struct Harness {
    nvr: Arc<FakeNvr>,
    senders: Vec<Arc<RecordingSender>>,
    status: Arc<StatusReporter>,
    processor: EventProcessor,
}

fn harness(
    events: Vec<DetectionEvent>,
    failing: &[bool],
    dedup: bool,
    notify_detections: bool,
) -> Harness {
    let nvr = FakeNvr::with_events(events);
    let senders: Vec<_> = failing.iter().map(|fail| RecordingSender::new(*fail)).collect();
    let profiles = senders
        .iter()
        .enumerate()
        .map(|(index, sender)| profile(index, sender.clone()))
        .collect();

    let status = Arc::new(StatusReporter::new());
    let status_sink: Arc<dyn StatusSink> = status.clone();
    let dispatcher = Arc::new(Dispatcher::new(
        profiles,
        status_sink.clone(),
        Duration::from_secs(5),
        Some(chrono_tz::UTC),
    ));
    let dedup = dedup.then(|| Arc::new(ZoneDedupCache::new()));

    let processor = EventProcessor::new(
        nvr.clone(),
        Arc::new(FilterEngine::new(rules())),
        dedup,
        dispatcher,
        status_sink,
        notify_detections,
    )
    .with_link_base("https://nvr.example.com");

    Harness {
        nvr,
        senders,
        status,
        processor,
    }
}

fn review(kind: ReviewType, severity: Severity, detections: &[&str]) -> ReviewAggregate {
    ReviewAggregate {
        id: "r1".to_string(),
        camera: "driveway".to_string(),
        kind,
        severity,
        detections: detections.iter().map(|d| d.to_string()).collect(),
        start_time: 1_700_000_000.0,
    }
}

mod review_tests {
    use super::*;

    #[tokio::test]
    async fn test_review_vetoed_by_one_failing_detection() {
        let h = harness(
            vec![
                DetectionEvent::new("d1", "driveway", "person", 0.9, 1.0),
                DetectionEvent::new("d2", "driveway", "car", 0.9, 2.0),
            ],
            &[false],
            true,
            true,
        );

        let report = h
            .processor
            .handle_review(review(ReviewType::New, Severity::Alert, &["d1", "d2"]))
            .await;

        assert!(report.is_none());
        assert_eq!(h.senders[0].count(), 0);
        assert_eq!(h.status.snapshot().alerts_seen, 0);
    }

    #[tokio::test]
    async fn test_review_alert_uses_first_detection() {
        let h = harness(
            vec![
                DetectionEvent::new("d1", "driveway", "person", 0.9, 1.0).with_zones(["porch"]),
                DetectionEvent::new("d2", "driveway", "dog", 0.8, 2.0).with_zones(["yard"]),
            ],
            &[false],
            true,
            true,
        );

        let report = h
            .processor
            .handle_review(review(ReviewType::New, Severity::Alert, &["d1", "d2"]))
            .await
            .expect("alert");
        assert_eq!(report.delivered(), 1);

        let messages = h.senders[0].messages.lock();
        let message = &messages[0];
        assert_eq!(message.event_id, "d1");
        assert_eq!(message.label, "person");
        assert_eq!(
            message.links.review_url.as_deref(),
            Some("https://nvr.example.com/review?id=r1")
        );
        assert!(message.context.zones.contains("porch"));
        assert!(message.context.zones.contains("yard"));
        assert!(message.context.labels.contains("dog"));
    }

    #[tokio::test]
    async fn test_detection_severity_gated() {
        let h = harness(
            vec![DetectionEvent::new("d1", "driveway", "person", 0.9, 1.0)],
            &[false],
            true,
            false,
        );

        let report = h
            .processor
            .handle_review(review(ReviewType::New, Severity::Detection, &["d1"]))
            .await;

        assert!(report.is_none());
        assert_eq!(h.senders[0].count(), 0);
    }

    #[tokio::test]
    async fn test_update_reaching_new_zone_alerts_again() {
        let h = harness(
            vec![DetectionEvent::new("d1", "driveway", "person", 0.9, 1.0).with_zones(["porch"])],
            &[false],
            true,
            true,
        );

        h.processor
            .accept(Ingested::Review(review(ReviewType::New, Severity::Alert, &["d1"])))
            .await;
        h.processor
            .accept(Ingested::Review(review(ReviewType::Update, Severity::Alert, &["d1"])))
            .await;
        assert_eq!(h.senders[0].count(), 1);

        h.nvr.events.lock().insert(
            "d1".to_string(),
            DetectionEvent::new("d1", "driveway", "person", 0.9, 1.0).with_zones(["porch", "door"]),
        );
        h.processor
            .accept(Ingested::Review(review(ReviewType::Update, Severity::Alert, &["d1"])))
            .await;
        assert_eq!(h.senders[0].count(), 2);

        h.processor
            .accept(Ingested::Review(review(ReviewType::End, Severity::Alert, &["d1"])))
            .await;
        h.processor
            .accept(Ingested::Review(review(ReviewType::New, Severity::Alert, &["d1"])))
            .await;
        assert_eq!(h.senders[0].count(), 3);
    }

    #[tokio::test]
    async fn test_update_after_failed_fetch_is_suppressed() {
        // d1 is not yet known to the NVR, so the new review alerts on d2.
        let h = harness(
            vec![DetectionEvent::new("d2", "driveway", "person", 0.8, 2.0).with_zones(["porch"])],
            &[false],
            true,
            true,
        );

        h.processor
            .accept(Ingested::Review(review(ReviewType::New, Severity::Alert, &["d1", "d2"])))
            .await;
        assert_eq!(h.senders[0].messages.lock()[0].event_id, "d2");

        h.nvr.events.lock().insert(
            "d1".to_string(),
            DetectionEvent::new("d1", "driveway", "person", 0.9, 1.0).with_zones(["porch"]),
        );
        h.processor
            .accept(Ingested::Review(review(ReviewType::Update, Severity::Alert, &["d1", "d2"])))
            .await;
        assert_eq!(h.senders[0].count(), 1);
    }
}

mod dispatch_tests {
    use super::*;

    #[tokio::test]
    async fn test_failing_profile_is_isolated_and_recorded_once() {
        let h = harness(Vec::new(), &[false, true, false], true, true);

        let report = h
            .processor
            .handle_detection(DetectionEvent::new("d1", "driveway", "person", 0.9, 1.0))
            .await
            .expect("alert");

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.delivered(), 2);
        assert!(h.senders.iter().all(|s| s.count() == 1));

        let snapshot = h.status.snapshot();
        assert_eq!(snapshot.profile(key(0)).map(|p| (p.sent, p.failed)), Some((1, 0)));
        assert_eq!(snapshot.profile(key(1)).map(|p| (p.sent, p.failed)), Some((0, 1)));
        assert_eq!(snapshot.profile(key(2)).map(|p| (p.sent, p.failed)), Some((1, 0)));
        assert_eq!(
            snapshot.profile(key(1)).and_then(|p| p.last_error.clone()).as_deref(),
            Some("HTTP 502")
        );
        assert_eq!(h.status.profile_health(key(1)), HealthStatus::Degraded);
        assert_eq!(snapshot.events_seen, 1);
        assert_eq!(snapshot.alerts_seen, 1);
    }

    #[tokio::test]
    async fn test_snapshot_fetched_once_and_shared() {
        let h = harness(Vec::new(), &[false, false, false], true, true);

        h.processor
            .handle_detection(
                DetectionEvent::new("d1", "driveway", "person", 0.9, 1.0).with_media(true, true),
            )
            .await
            .expect("alert");

        assert_eq!(h.nvr.snapshot_calls.load(Ordering::SeqCst), 1);
        for sender in &h.senders {
            let messages = sender.messages.lock();
            assert_eq!(messages[0].image.as_deref(), Some(&b"\xff\xd8jpeg"[..]));
            assert_eq!(
                messages[0].links.clip_url.as_deref(),
                Some("https://nvr.example.com/api/events/d1/clip.mp4")
            );
        }
    }

    #[tokio::test]
    async fn test_no_snapshot_fetch_without_snapshot() {
        let h = harness(Vec::new(), &[false], true, true);

        h.processor
            .handle_detection(DetectionEvent::new("d1", "driveway", "person", 0.9, 1.0))
            .await
            .expect("alert");

        assert_eq!(h.nvr.snapshot_calls.load(Ordering::SeqCst), 0);
        assert!(h.senders[0].messages.lock()[0].image.is_none());
    }
}

mod dedup_tests {
    use super::*;

    #[tokio::test]
    async fn test_repeat_zones_suppressed_until_new_zone() {
        let h = harness(Vec::new(), &[false], true, true);
        let event = |zones: &[&str]| {
            DetectionEvent::new("d1", "driveway", "person", 0.9, 1.0)
                .with_zones(zones.iter().copied())
        };

        assert!(h.processor.handle_detection(event(&["porch"])).await.is_some());
        assert!(h.processor.handle_detection(event(&["porch"])).await.is_none());
        assert!(h.processor.handle_detection(event(&["porch", "door"])).await.is_some());
        assert!(h.processor.handle_detection(event(&["door"])).await.is_none());

        h.processor.accept(Ingested::DetectionEnded("d1".to_string())).await;
        assert!(h.processor.handle_detection(event(&["porch"])).await.is_some());

        assert_eq!(h.senders[0].count(), 3);
    }

    #[tokio::test]
    async fn test_without_dedup_every_detection_alerts() {
        let h = harness(Vec::new(), &[false], false, true);
        let event = DetectionEvent::new("d1", "driveway", "person", 0.9, 1.0).with_zones(["porch"]);

        assert!(h.processor.handle_detection(event.clone()).await.is_some());
        assert!(h.processor.handle_detection(event).await.is_some());
        assert_eq!(h.senders[0].count(), 2);
    }

    #[tokio::test]
    async fn test_filtered_detection_is_counted_but_not_sent() {
        let h = harness(Vec::new(), &[false], true, true);

        let report = h
            .processor
            .handle_detection(DetectionEvent::new("d1", "driveway", "car", 0.9, 1.0))
            .await;

        assert!(report.is_none());
        assert_eq!(h.senders[0].count(), 0);
        assert_eq!(h.status.snapshot().events_seen, 1);
    }
}

mod polling_tests {
    use super::*;

    #[tokio::test]
    async fn test_poll_feeds_processor() {
        let h = harness(
            vec![
                DetectionEvent::new("d1", "driveway", "person", 0.9, 100.0),
                DetectionEvent::new("d2", "driveway", "car", 0.9, 101.0),
                DetectionEvent::new("d3", "garden", "cat", 0.7, 102.0),
            ],
            &[false],
            true,
            true,
        );
        let source = PollingSource::new(h.nvr.clone(), PollingConfig::default());
        let mut watermark = Watermark::new(50.0);

        let delivered = source.poll_once(&mut watermark, &h.processor).await.unwrap();
        assert_eq!(delivered, 3);
        assert_eq!(watermark.get(), 102.0);

        let ids: Vec<String> = h.senders[0]
            .messages
            .lock()
            .iter()
            .map(|m| m.event_id.clone())
            .collect();
        assert_eq!(ids, vec!["d1", "d3"]);

        let delivered = source.poll_once(&mut watermark, &h.processor).await.unwrap();
        assert_eq!(delivered, 0);
    }
}
