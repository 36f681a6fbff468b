//! Notification profiles.
//!
//! A profile is one configured channel instance: a sender plus its own
//! allow-lists, quiet hours and message template. Several profiles of the
//! same provider kind may coexist; each is addressed by its kind and its
//! position in that kind's list.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::channels::AlertSender;
use super::context::AlertContext;
use super::template::MessageTemplate;
use crate::Result;
use crate::domain::filter::{QuietHours, QuietHoursConfig};

/// Supported provider kinds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProviderKind {
    Discord,
    Telegram,
    Webhook,
    Ntfy,
    Gotify,
}

/// Identity of a profile: its provider kind and index within that kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProfileKey {
    pub kind: ProviderKind,
    pub index: usize,
}

impl ProfileKey {
    pub fn new(kind: ProviderKind, index: usize) -> Self {
        Self { kind, index }
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.index)
    }
}

/// Profile-scoped allow-lists and quiet hours. Empty lists admit everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFilter {
    #[serde(default)]
    pub cameras: Vec<String>,
    #[serde(default)]
    pub zones: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub sub_labels: Vec<String>,
    #[serde(default)]
    pub quiet_hours: Option<QuietHoursConfig>,
}

/// Common profile settings with provider-specific settings flattened in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig<T> {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub filters: ProfileFilter,
    #[serde(default)]
    pub template: Option<MessageTemplate>,
    #[serde(flatten)]
    pub settings: T,
}

fn default_enabled() -> bool {
    true
}

/// Why a profile sat out an alert.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    QuietHours,
    Camera,
    Zone,
    Label,
    SubLabel,
}

/// A ready-to-use profile.
pub struct NotificationProfile {
    pub key: ProfileKey,
    pub name: Option<String>,
    pub enabled: bool,
    pub filter: ProfileFilter,
    pub quiet_hours: Option<QuietHours>,
    pub template: MessageTemplate,
    pub sender: Arc<dyn AlertSender>,
}

impl fmt::Debug for NotificationProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationProfile")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl NotificationProfile {
    /// Build a profile from its configuration and sender.
    pub fn from_config<T>(
        key: ProfileKey,
        config: &ProfileConfig<T>,
        sender: Arc<dyn AlertSender>,
    ) -> Result<Self> {
        let quiet_hours = config
            .filters
            .quiet_hours
            .as_ref()
            .map(QuietHoursConfig::parse)
            .transpose()?;

        Ok(Self {
            key,
            name: config.name.clone(),
            enabled: config.enabled,
            filter: config.filters.clone(),
            quiet_hours,
            template: config.template.clone().unwrap_or_default(),
            sender,
        })
    }

    /// Label for logs: the configured name, else the key.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({})", name, self.key),
            None => self.key.to_string(),
        }
    }

    /// Decide whether this profile takes part in an alert.
    pub fn admits(
        &self,
        context: &AlertContext,
        now: DateTime<Utc>,
        timezone: Option<Tz>,
    ) -> std::result::Result<(), SkipReason> {
        if !self.enabled {
            return Err(SkipReason::Disabled);
        }
        if let Some(quiet) = &self.quiet_hours
            && quiet.is_quiet_at(now, timezone)
        {
            return Err(SkipReason::QuietHours);
        }

        let checks = [
            (&self.filter.cameras, &context.cameras, SkipReason::Camera),
            (&self.filter.zones, &context.zones, SkipReason::Zone),
            (&self.filter.labels, &context.labels, SkipReason::Label),
            (&self.filter.sub_labels, &context.sub_labels, SkipReason::SubLabel),
        ];
        for (allow, seen, reason) in checks {
            if !allows_any(allow, seen) {
                return Err(reason);
            }
        }
        Ok(())
    }
}

fn allows_any(allow: &[String], seen: &BTreeSet<String>) -> bool {
    allow.is_empty() || allow.iter().any(|a| seen.contains(a))
}
