//! Routing and dispatch of alerts to notification profiles.
//!
//! Every enabled profile is considered independently: quiet hours, then the
//! profile's allow-lists, then template rendering, then a send on its own task
//! bounded by a timeout. A failing or slow profile never holds up the others,
//! and every attempted profile yields exactly one [`DispatchOutcome`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::channels::AlertMessage;
use super::context::AlertContext;
use super::profile::{NotificationProfile, ProfileKey, SkipReason};
use super::template::TemplateValues;
use crate::Error;
use crate::domain::{DetectionEvent, Severity};
use crate::status::StatusSink;

/// Default per-send timeout.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// An alert-worthy event ready for dispatch.
#[derive(Debug, Clone)]
pub struct Alert {
    /// Representative detection; links are taken from it.
    pub event: DetectionEvent,
    /// Every detection the alert covers, the representative included.
    pub detections: Vec<DetectionEvent>,
    /// Review severity, when the alert came from a review.
    pub severity: Option<Severity>,
    /// Snapshot shared by every profile.
    pub snapshot: Option<Bytes>,
}

impl Alert {
    /// An alert for a single detection.
    pub fn single(event: DetectionEvent) -> Self {
        Self {
            detections: vec![event.clone()],
            event,
            severity: None,
            snapshot: None,
        }
    }

    pub fn with_snapshot(mut self, snapshot: Option<Bytes>) -> Self {
        self.snapshot = snapshot;
        self
    }
}

/// Result of one send attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub profile: ProfileKey,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DispatchOutcome {
    pub fn succeeded(profile: ProfileKey) -> Self {
        Self {
            profile,
            success: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(profile: ProfileKey, error: impl Into<String>) -> Self {
        Self {
            profile,
            success: false,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// What happened to every profile for one alert.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<DispatchOutcome>,
    pub skipped: Vec<(ProfileKey, SkipReason)>,
}

impl DispatchReport {
    pub fn outcome(&self, key: ProfileKey) -> Option<&DispatchOutcome> {
        self.outcomes.iter().find(|o| o.profile == key)
    }

    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }
}

/// Fans alerts out to notification profiles.
pub struct Dispatcher {
    profiles: Vec<Arc<NotificationProfile>>,
    status: Arc<dyn StatusSink>,
    send_timeout: Duration,
    timezone: Option<Tz>,
}

impl Dispatcher {
    pub fn new(
        profiles: Vec<NotificationProfile>,
        status: Arc<dyn StatusSink>,
        send_timeout: Duration,
        timezone: Option<Tz>,
    ) -> Self {
        Self {
            profiles: profiles.into_iter().map(Arc::new).collect(),
            status,
            send_timeout,
            timezone,
        }
    }

    pub fn profiles(&self) -> &[Arc<NotificationProfile>] {
        &self.profiles
    }

    /// Dispatch an alert now.
    pub async fn dispatch(&self, alert: &Alert) -> DispatchReport {
        self.dispatch_at(alert, Utc::now()).await
    }

    /// Dispatch an alert, evaluating quiet hours at `now`.
    pub async fn dispatch_at(&self, alert: &Alert, now: DateTime<Utc>) -> DispatchReport {
        let mut report = DispatchReport::default();
        let context = AlertContext::from_detections(&alert.detections);
        let values = self.template_values(alert, &context);

        let mut keys = Vec::new();
        let mut tasks = Vec::new();
        for profile in &self.profiles {
            if let Err(reason) = profile.admits(&context, now, self.timezone) {
                trace!(profile = %profile.label(), reason = %reason, "Profile skipped");
                report.skipped.push((profile.key, reason));
                continue;
            }

            let (title, body) = match profile.template.render(&values) {
                Ok(rendered) => rendered,
                Err(e) => {
                    warn!(profile = %profile.label(), error = %e, "Failed to render message");
                    let outcome = DispatchOutcome::failed(profile.key, e.to_string());
                    self.status.record_outcome(&outcome);
                    report.outcomes.push(outcome);
                    continue;
                }
            };

            let message = AlertMessage {
                title,
                body,
                image: alert.snapshot.clone(),
                links: alert.event.links.clone(),
                context: context.clone(),
                event_id: alert.event.id.clone(),
                camera: alert.event.camera.clone(),
                label: alert.event.label.clone(),
                timestamp: alert.event.started_at(),
            };

            let key = profile.key;
            let sender = profile.sender.clone();
            let status = self.status.clone();
            let timeout = self.send_timeout;
            keys.push(key);
            tasks.push(tokio::spawn(async move {
                let result = match tokio::time::timeout(timeout, sender.send(&message)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(timeout)),
                };
                let outcome = match result {
                    Ok(()) => DispatchOutcome::succeeded(key),
                    Err(e) => DispatchOutcome::failed(key, e.to_string()),
                };
                finish(status.as_ref(), &message.event_id, &outcome);
                outcome
            }));
        }

        // Sends record their own outcome as soon as they finish; only a
        // panicked send is recorded here.
        let results = join_all(tasks).await;
        for (key, result) in keys.into_iter().zip(results) {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    let outcome = DispatchOutcome::failed(key, format!("send task failed: {}", e));
                    finish(self.status.as_ref(), &alert.event.id, &outcome);
                    outcome
                }
            };
            report.outcomes.push(outcome);
        }

        info!(
            event_id = %alert.event.id,
            camera = %alert.event.camera,
            delivered = report.delivered(),
            attempted = report.outcomes.len(),
            skipped = report.skipped.len(),
            "Alert dispatched"
        );
        report
    }

    fn template_values(&self, alert: &Alert, context: &AlertContext) -> TemplateValues {
        let event = &alert.event;
        let started = event.started_at();
        let time = match self.timezone {
            Some(tz) => started.with_timezone(&tz).format(TIME_FORMAT).to_string(),
            None => started.with_timezone(&Local).format(TIME_FORMAT).to_string(),
        };

        TemplateValues {
            camera: event.camera.clone(),
            label: event.label.clone(),
            sub_label: event.sub_label_text(),
            score: format!("{:.0}", event.normalized_score()),
            zones: context.zones.iter().cloned().collect::<Vec<_>>().join(", "),
            time,
            id: event.id.clone(),
            review_url: event.links.review_url.clone().unwrap_or_default(),
            clip_url: event.links.clip_url.clone().unwrap_or_default(),
            severity: alert.severity.map(|s| s.to_string()).unwrap_or_default(),
        }
    }
}

/// Log a finished send and hand it to the status sink.
fn finish(status: &dyn StatusSink, event_id: &str, outcome: &DispatchOutcome) {
    match &outcome.error {
        None => debug!(profile = %outcome.profile, event_id = %event_id, "Alert delivered"),
        Some(error) => warn!(
            profile = %outcome.profile,
            event_id = %event_id,
            error = %error,
            "Alert delivery failed"
        ),
    }
    status.record_outcome(outcome);
}
