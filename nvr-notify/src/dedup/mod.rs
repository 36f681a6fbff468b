//! Zone dedup cache.
//!
//! Remembers which zones already justified an alert for an event identity so
//! an object that re-enters view is not announced again, while an object that
//! reaches a new zone is.
//!
//! Backed by a `moka` cache:
//! - **TTL**: entries expire after the configured time-to-live (default 1 hour).
//! - **Bounded**: at most `capacity` identities (default 500); moka's TinyLFU
//!   policy evicts the least valuable entry first. An evicted identity is simply
//!   alerted again.
//! - **Atomic per key**: the record-and-test step runs through
//!   `entry().and_compute_with`, so concurrent handlers for the same identity
//!   never lose a zone.

use std::collections::BTreeSet;
use std::time::Duration;

use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Default maximum number of tracked identities.
pub const DEFAULT_CAPACITY: u64 = 500;

/// Default time-to-live for an identity.
pub const DEFAULT_TTL_SECS: u64 = 60 * 60;

/// Dedup cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Whether the pipeline consults the cache before alerting.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_capacity")]
    pub capacity: u64,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_capacity() -> u64 {
    DEFAULT_CAPACITY
}

fn default_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_CAPACITY,
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

/// Event identity -> zones already alerted.
pub struct ZoneDedupCache {
    cache: Cache<String, BTreeSet<String>>,
}

impl ZoneDedupCache {
    /// Create a cache with the default capacity and TTL.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, Duration::from_secs(DEFAULT_TTL_SECS))
    }

    /// Create a cache from configuration.
    pub fn from_config(config: &DedupConfig) -> Self {
        Self::with_limits(config.capacity, Duration::from_secs(config.ttl_secs))
    }

    /// Create a cache with explicit limits.
    pub fn with_limits(capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .name("zone-dedup")
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Record `zones` for `id` and report whether they were all alerted before.
    ///
    /// - Unknown identity: stored, returns `false`.
    /// - Every zone already stored: nothing changes, returns `true`.
    /// - At least one new zone: merged into the stored set, returns `false`.
    pub fn zone_already_alerted(&self, id: &str, zones: &BTreeSet<String>) -> bool {
        let result = self
            .cache
            .entry(id.to_string())
            .and_compute_with(|existing| match existing {
                None => Op::Put(zones.clone()),
                Some(entry) => {
                    let stored = entry.into_value();
                    if zones.is_subset(&stored) {
                        Op::Nop
                    } else {
                        let mut merged = stored;
                        merged.extend(zones.iter().cloned());
                        Op::Put(merged)
                    }
                }
            });

        match result {
            CompResult::Unchanged(_) => {
                trace!(event_id = %id, "Zones already alerted");
                true
            }
            CompResult::Inserted(_) => {
                trace!(event_id = %id, "First alert for event");
                false
            }
            CompResult::ReplacedWith(entry) => {
                debug!(event_id = %id, zones = ?entry.value(), "Event reached a new zone");
                false
            }
            // Not produced by the closure above; treat as a fresh event.
            CompResult::Removed(_) | CompResult::StillNone(_) => false,
        }
    }

    /// Forget an identity, e.g. once the NVR reports the event has ended.
    pub fn del_zone_alerted(&self, id: &str) {
        self.cache.invalidate(id);
        trace!(event_id = %id, "Cleared zone dedup entry");
    }

    /// Zones currently stored for an identity.
    pub fn zones_for(&self, id: &str) -> Option<BTreeSet<String>> {
        self.cache.get(id)
    }

    /// Approximate number of tracked identities.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Apply pending evictions and expirations now.
    pub fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
    }
}

impl Default for ZoneDedupCache {
    fn default() -> Self {
        Self::new()
    }
}
