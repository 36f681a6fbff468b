//! Pipeline status reporting.
//!
//! Consumes dispatch outcomes and event/alert sightings and keeps per-profile
//! health counters for an external status API. Counters for different profiles
//! never share a lock: each profile has its own atomics and its own small
//! mutex for the last outcome.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::notification::{DispatchOutcome, ProfileKey};

/// Consecutive failures after which a profile is reported unhealthy.
const UNHEALTHY_AFTER_FAILURES: u64 = 3;

/// Health status of a profile or of the whole pipeline.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Default,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthStatus {
    /// No attempt recorded yet.
    #[default]
    Unknown,
    Healthy,
    /// Recent failures, but below the unhealthy threshold.
    Degraded,
    Unhealthy,
}

/// Receiver of pipeline outcomes.
pub trait StatusSink: Send + Sync {
    fn record_outcome(&self, outcome: &DispatchOutcome);
    fn record_event_seen(&self, at: DateTime<Utc>);
    fn record_alert_seen(&self, at: DateTime<Utc>);
}

#[derive(Debug, Clone)]
struct LastOutcome {
    success: bool,
    at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ProfileCounters {
    name: Mutex<Option<String>>,
    sent: AtomicU64,
    failed: AtomicU64,
    consecutive_failures: AtomicU64,
    last: Mutex<Option<LastOutcome>>,
    last_error: Mutex<Option<(String, DateTime<Utc>)>>,
}

impl ProfileCounters {
    fn health(&self) -> HealthStatus {
        if self.sent.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed) == 0 {
            return HealthStatus::Unknown;
        }
        match self.consecutive_failures.load(Ordering::Relaxed) {
            0 => HealthStatus::Healthy,
            n if n < UNHEALTHY_AFTER_FAILURES => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        }
    }
}

/// Serialisable view of one profile.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileStatus {
    pub profile: ProfileKey,
    pub name: Option<String>,
    pub status: HealthStatus,
    pub sent: u64,
    pub failed: u64,
    pub consecutive_failures: u64,
    pub last_success: Option<bool>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

/// Serialisable view of the whole pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: HealthStatus,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub events_seen: u64,
    pub alerts_seen: u64,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_alert_at: Option<DateTime<Utc>>,
    pub profiles: Vec<ProfileStatus>,
}

impl StatusSnapshot {
    /// Find a profile by key.
    pub fn profile(&self, key: ProfileKey) -> Option<&ProfileStatus> {
        self.profiles.iter().find(|p| p.profile == key)
    }
}

/// In-memory [`StatusSink`].
pub struct StatusReporter {
    started_at: DateTime<Utc>,
    profiles: DashMap<ProfileKey, Arc<ProfileCounters>>,
    events_seen: AtomicU64,
    alerts_seen: AtomicU64,
    last_event_at: Mutex<Option<DateTime<Utc>>>,
    last_alert_at: Mutex<Option<DateTime<Utc>>>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            profiles: DashMap::new(),
            events_seen: AtomicU64::new(0),
            alerts_seen: AtomicU64::new(0),
            last_event_at: Mutex::new(None),
            last_alert_at: Mutex::new(None),
        }
    }

    /// Make a profile visible before its first outcome.
    pub fn register(&self, key: ProfileKey, name: Option<String>) {
        let counters = self.counters(key);
        *counters.name.lock() = name;
    }

    fn counters(&self, key: ProfileKey) -> Arc<ProfileCounters> {
        // Clone the Arc so the shard lock is released before updating.
        self.profiles.entry(key).or_default().clone()
    }

    /// Current status of a single profile.
    pub fn profile_health(&self, key: ProfileKey) -> HealthStatus {
        self.profiles
            .get(&key)
            .map(|c| c.health())
            .unwrap_or_default()
    }

    /// Build a serialisable snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        let mut profiles: Vec<ProfileStatus> = self
            .profiles
            .iter()
            .map(|entry| {
                let counters = entry.value();
                let last = counters.last.lock().clone();
                let last_error = counters.last_error.lock().clone();
                ProfileStatus {
                    profile: *entry.key(),
                    name: counters.name.lock().clone(),
                    status: counters.health(),
                    sent: counters.sent.load(Ordering::Relaxed),
                    failed: counters.failed.load(Ordering::Relaxed),
                    consecutive_failures: counters.consecutive_failures.load(Ordering::Relaxed),
                    last_success: last.as_ref().map(|l| l.success),
                    last_attempt_at: last.as_ref().map(|l| l.at),
                    last_error: last_error.as_ref().map(|(e, _)| e.clone()),
                    last_error_at: last_error.map(|(_, at)| at),
                }
            })
            .collect();
        profiles.sort_by_key(|p| p.profile);

        let status = profiles
            .iter()
            .map(|p| p.status)
            .filter(|s| *s != HealthStatus::Unknown)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        let now = Utc::now();
        StatusSnapshot {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: self.started_at,
            uptime_secs: (now - self.started_at).num_seconds().max(0) as u64,
            events_seen: self.events_seen.load(Ordering::Relaxed),
            alerts_seen: self.alerts_seen.load(Ordering::Relaxed),
            last_event_at: *self.last_event_at.lock(),
            last_alert_at: *self.last_alert_at.lock(),
            profiles,
        }
    }
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for StatusReporter {
    fn record_outcome(&self, outcome: &DispatchOutcome) {
        let counters = self.counters(outcome.profile);
        if outcome.success {
            counters.sent.fetch_add(1, Ordering::Relaxed);
            counters.consecutive_failures.store(0, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            counters.consecutive_failures.fetch_add(1, Ordering::Relaxed);
            if let Some(error) = &outcome.error {
                *counters.last_error.lock() = Some((error.clone(), outcome.timestamp));
            }
        }
        *counters.last.lock() = Some(LastOutcome {
            success: outcome.success,
            at: outcome.timestamp,
        });
        trace!(profile = %outcome.profile, success = outcome.success, "Recorded dispatch outcome");
    }

    fn record_event_seen(&self, at: DateTime<Utc>) {
        self.events_seen.fetch_add(1, Ordering::Relaxed);
        let mut last = self.last_event_at.lock();
        if last.is_none_or(|prev| at > prev) {
            *last = Some(at);
        }
    }

    fn record_alert_seen(&self, at: DateTime<Utc>) {
        self.alerts_seen.fetch_add(1, Ordering::Relaxed);
        let mut last = self.last_alert_at.lock();
        if last.is_none_or(|prev| at > prev) {
            *last = Some(at);
        }
    }
}
