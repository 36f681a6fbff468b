//! Application configuration.
//!
//! The whole service is configured from one JSON document. Every section has
//! serde defaults, so a minimal file only needs `nvr.server` and a profile.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::dedup::DedupConfig;
use crate::domain::filter::{AlertRules, ListRule, ZoneRule};
use crate::heartbeat::HeartbeatConfig;
use crate::ingest::IngestConfig;
use crate::logging::LoggingConfig;
use crate::notification::{DEFAULT_SEND_TIMEOUT, NotifyConfig};
use crate::nvr::NvrConfig;
use crate::{Error, Result};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "NVR_NOTIFY_CONFIG";

/// Config file used when neither an argument nor the env var is given.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Global alert rules and pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default)]
    pub zones: ZoneRule,
    #[serde(default)]
    pub labels: ListRule,
    #[serde(default)]
    pub sub_labels: ListRule,
    #[serde(default)]
    pub min_score: f64,
    /// Alert on detection-severity reviews too, not only alert-severity ones.
    #[serde(default = "default_notify_detections")]
    pub notify_detections: bool,
    #[serde(default)]
    pub dedup: DedupConfig,
    /// IANA timezone for quiet hours and message timestamps.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

fn default_notify_detections() -> bool {
    true
}

fn default_send_timeout_secs() -> u64 {
    DEFAULT_SEND_TIMEOUT.as_secs()
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            zones: ZoneRule::default(),
            labels: ListRule::default(),
            sub_labels: ListRule::default(),
            min_score: 0.0,
            notify_detections: default_notify_detections(),
            dedup: DedupConfig::default(),
            timezone: None,
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

impl AlertsConfig {
    /// Rules for the global filter engine.
    pub fn rules(&self) -> AlertRules {
        AlertRules {
            zones: self.zones.clone(),
            labels: self.labels.clone(),
            sub_labels: self.sub_labels.clone(),
            min_score: self.min_score,
        }
    }

    /// Parsed timezone; `None` means local time.
    pub fn timezone(&self) -> Result<Option<Tz>> {
        match &self.timezone {
            None => Ok(None),
            Some(name) => name
                .parse::<Tz>()
                .map(Some)
                .map_err(|_| Error::config(format!("unknown timezone '{}'", name))),
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs.max(1))
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub nvr: NvrConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Parse a config document without validating it.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("invalid config: {}", e)))
    }

    /// Read and parse a config file without validating it.
    ///
    /// Lets the caller set up logging from the file before validation
    /// warnings are emitted.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    /// Read, parse and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = Self::read(path)?;
        config.validate()?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Resolve the config path: explicit argument, then env var, then default.
    pub fn resolve_path(arg: Option<String>) -> PathBuf {
        arg.or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
            .into()
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.nvr.server)
            .map_err(|e| Error::config(format!("nvr.server '{}': {}", self.nvr.server, e)))?;
        if let Some(public_url) = &self.nvr.public_url {
            Url::parse(public_url)
                .map_err(|e| Error::config(format!("nvr.public_url '{}': {}", public_url, e)))?;
        }

        if let IngestConfig::Subscription(mqtt) = &self.ingest
            && mqtt.host.trim().is_empty()
        {
            return Err(Error::config("ingest.host must be set in subscription mode"));
        }

        if !(0.0..=100.0).contains(&self.alerts.min_score) {
            return Err(Error::config(format!(
                "alerts.min_score must be within 0..=100, got {}",
                self.alerts.min_score
            )));
        }
        if self.alerts.dedup.capacity == 0 {
            return Err(Error::config("alerts.dedup.capacity must be greater than 0"));
        }
        self.alerts.timezone()?;

        let mut profile_error = None;
        self.notify.for_each_profile(|key, filter, template| {
            if profile_error.is_some() {
                return;
            }
            if let Some(quiet_hours) = &filter.quiet_hours
                && let Err(e) = quiet_hours.parse()
            {
                profile_error = Some(Error::config(format!("{}: {}", key, e)));
                return;
            }
            if let Some(template) = template
                && let Err(e) = template.validate()
            {
                profile_error = Some(Error::config(format!("{}: {}", key, e)));
            }
        });
        if let Some(e) = profile_error {
            return Err(e);
        }

        if self.heartbeat.enabled && self.heartbeat.url.as_deref().is_none_or(str::is_empty) {
            return Err(Error::config("heartbeat.url must be set when heartbeat is enabled"));
        }

        if self.notify.enabled_count() == 0 {
            warn!("No enabled notification profiles, alerts will not be delivered");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::TopicMode;
    use std::io::Write;

    const MINIMAL: &str = r#"{
        "nvr": {"server": "http://nvr.lan:5000"},
        "notify": {"ntfy": [{"topic": "cams"}]}
    }"#;

    #[test]
    fn test_minimal_defaults() {
        let config = AppConfig::from_json(MINIMAL).unwrap();
        config.validate().unwrap();

        assert!(matches!(config.ingest, IngestConfig::Polling(ref p) if p.interval_secs == 30));
        assert!(config.alerts.notify_detections);
        assert!(config.alerts.dedup.enabled);
        assert_eq!(config.alerts.dedup.capacity, 500);
        assert_eq!(config.alerts.send_timeout(), Duration::from_secs(10));
        assert_eq!(config.nvr.startup_check.attempts, 5);
        assert!(!config.heartbeat.enabled);
        assert_eq!(config.logging.retention_days, 7);
        assert_eq!(config.notify.enabled_count(), 1);
    }

    #[test]
    fn test_subscription_mode() {
        let config = AppConfig::from_json(
            r#"{
                "nvr": {"server": "http://nvr.lan:5000"},
                "ingest": {"mode": "subscription", "host": "broker.lan", "topic": "events"}
            }"#,
        )
        .unwrap();
        config.validate().unwrap();
        let IngestConfig::Subscription(mqtt) = &config.ingest else {
            panic!("expected subscription mode");
        };
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.topic, TopicMode::Events);
        assert_eq!(mqtt.topic_name(), "frigate/events");
    }

    #[test]
    fn test_subscription_requires_host() {
        let config = AppConfig::from_json(
            r#"{"nvr": {"server": "http://nvr"}, "ingest": {"mode": "subscription"}}"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_rejects_bad_server_url() {
        let config = AppConfig::from_json(r#"{"nvr": {"server": "not a url"}}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_score() {
        let config = AppConfig::from_json(
            r#"{"nvr": {"server": "http://nvr"}, "alerts": {"min_score": 150}}"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_dedup_capacity() {
        let config = AppConfig::from_json(
            r#"{"nvr": {"server": "http://nvr"}, "alerts": {"dedup": {"capacity": 0}}}"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timezone() {
        let config = AppConfig::from_json(
            r#"{"nvr": {"server": "http://nvr"}, "alerts": {"timezone": "Europe/Berlin"}}"#,
        )
        .unwrap();
        assert_eq!(config.alerts.timezone().unwrap(), Some(chrono_tz::Europe::Berlin));

        let config = AppConfig::from_json(
            r#"{"nvr": {"server": "http://nvr"}, "alerts": {"timezone": "Mars/Olympus"}}"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_quiet_hours() {
        let config = AppConfig::from_json(
            r#"{
                "nvr": {"server": "http://nvr"},
                "notify": {"ntfy": [{"topic": "cams",
                    "filters": {"quiet_hours": {"start": "25:00", "end": "06:00"}}}]}
            }"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("ntfy#0"), "{}", err);
    }

    #[test]
    fn test_rejects_bad_template() {
        let config = AppConfig::from_json(
            r#"{
                "nvr": {"server": "http://nvr"},
                "notify": {"discord": [{"webhook_url": "https://discord.com/api/webhooks/1/a",
                    "template": {"title": "{nope}", "body": "{label}"}}]}
            }"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_requires_url() {
        let config = AppConfig::from_json(
            r#"{"nvr": {"server": "http://nvr"}, "heartbeat": {"enabled": true}}"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_no_profiles_is_not_an_error() {
        let config = AppConfig::from_json(r#"{"nvr": {"server": "http://nvr"}}"#).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.nvr.server, "http://nvr.lan:5000");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppConfig::load(dir.path().join("missing.json"));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_resolve_path_prefers_argument() {
        let path = AppConfig::resolve_path(Some("/etc/nvr-notify.json".to_string()));
        assert_eq!(path, PathBuf::from("/etc/nvr-notify.json"));
    }
}
