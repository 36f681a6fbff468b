//! Logging setup.
//!
//! This module provides:
//! - Console output with local timezone timestamps, plain or JSON
//! - Optional daily-rolling log files
//! - Log file retention cleanup

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "nvr_notify=info,rumqttc=warn,reqwest=warn";

/// Prefix of rolled log files (`nvr-notify.log.YYYY-MM-DD`).
const LOG_FILE_PREFIX: &str = "nvr-notify.log";

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Timer that formats timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive; `RUST_LOG` takes precedence.
    #[serde(default)]
    pub filter: Option<String>,
    /// Emit console logs as JSON lines.
    #[serde(default)]
    pub json: bool,
    /// Directory for rolling log files. No files are written when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_retention_days() -> i64 {
    7
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            json: false,
            dir: None,
            retention_days: default_retention_days(),
        }
    }
}

impl LoggingConfig {
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let directive = self.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
            EnvFilter::try_new(directive).unwrap_or_else(|e| {
                eprintln!("Invalid log filter '{}': {}, using default", directive, e);
                EnvFilter::new(DEFAULT_LOG_FILTER)
            })
        })
    }
}

/// Initialize the global subscriber.
///
/// Returns the file writer guard when file logging is enabled; keep it alive
/// for the lifetime of the process so buffered lines are flushed.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let (file_writer, guard) = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let console = (!config.json).then(|| fmt::layer().with_ansi(true).with_timer(LocalTimer));
    let console_json = config
        .json
        .then(|| fmt::layer().json().with_timer(LocalTimer));
    let file = file_writer.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_timer(LocalTimer)
    });

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(console)
        .with(console_json)
        .with(file)
        .try_init()
        .map_err(|e| Error::other(format!("Failed to set global default subscriber: {}", e)))?;

    Ok(guard)
}

/// Start the daily log retention task. Does nothing without a log directory.
pub fn start_retention_cleanup(config: &LoggingConfig, cancel: CancellationToken) {
    let Some(log_dir) = config.dir.clone() else {
        return;
    };
    let retention_days = config.retention_days.max(1);

    tokio::spawn(async move {
        loop {
            if let Err(e) = cleanup_old_logs(&log_dir, retention_days).await {
                warn!(error = %e, "Failed to cleanup old logs");
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Log retention cleanup task shutting down");
                    break;
                }
                _ = tokio::time::sleep(CLEANUP_INTERVAL) => {}
            }
        }
    });
}

/// Delete rolled log files older than `retention_days`.
///
/// Returns the number of files removed.
pub async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(date_str) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(LOG_FILE_PREFIX))
            .and_then(|n| n.strip_prefix('.'))
        else {
            continue;
        };

        let Ok(file_date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };

        if file_date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted_count += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to delete old log file")
                }
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }

    Ok(deleted_count)
}
