//! Service wiring.
//!
//! Builds every component from an [`AppConfig`], checks that the NVR is
//! reachable, then runs the configured event source until ctrl-c.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::dedup::ZoneDedupCache;
use crate::domain::filter::FilterEngine;
use crate::heartbeat::Heartbeat;
use crate::ingest::{EventSink, EventSource, IngestConfig, PollingSource, SubscriptionSource};
use crate::notification::Dispatcher;
use crate::nvr::{self, NvrApi, NvrClient};
use crate::pipeline::EventProcessor;
use crate::status::{StatusReporter, StatusSink};
use crate::utils::http_client::build_client;
use crate::Result;

/// Pick the event source for the configured ingestion mode.
pub fn build_source(config: &IngestConfig, api: Arc<dyn NvrApi>) -> Box<dyn EventSource> {
    match config {
        IngestConfig::Polling(polling) => Box::new(PollingSource::new(api, polling.clone())),
        IngestConfig::Subscription(mqtt) => Box::new(SubscriptionSource::new(mqtt.clone())),
    }
}

/// The running service.
pub struct App {
    config: AppConfig,
    status: Arc<StatusReporter>,
    cancel: CancellationToken,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            status: Arc::new(StatusReporter::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Status reporter shared with the pipeline.
    pub fn status(&self) -> Arc<StatusReporter> {
        self.status.clone()
    }

    /// Token that stops the service when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build the processing pipeline for `api`.
    pub fn build_processor(&self, api: Arc<dyn NvrApi>) -> Result<EventProcessor> {
        let alerts = &self.config.alerts;
        let timezone = alerts.timezone()?;

        let filter = Arc::new(FilterEngine::new(alerts.rules()));
        let dedup = alerts
            .dedup
            .enabled
            .then(|| Arc::new(ZoneDedupCache::from_config(&alerts.dedup)));

        let client = build_client(alerts.send_timeout(), HeaderMap::new())?;
        let profiles = self.config.notify.build_profiles(&client)?;
        for profile in &profiles {
            self.status.register(profile.key, profile.name.clone());
        }
        info!(
            profiles = profiles.len(),
            enabled = self.config.notify.enabled_count(),
            "Notification profiles loaded"
        );

        let status: Arc<dyn StatusSink> = self.status.clone();
        let dispatcher = Arc::new(Dispatcher::new(
            profiles,
            status.clone(),
            alerts.send_timeout(),
            timezone,
        ));

        let processor = EventProcessor::new(
            api,
            filter,
            dedup,
            dispatcher,
            status,
            alerts.notify_detections,
        )
        .with_link_base(self.config.nvr.link_base());

        Ok(processor)
    }

    /// Run until ctrl-c or a fatal error.
    pub async fn run(self) -> Result<()> {
        let cancel = self.cancel.clone();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Shutdown requested"),
                    Err(e) => warn!(error = %e, "Failed to listen for ctrl-c"),
                }
                cancel.cancel();
            }
        });

        let api: Arc<dyn NvrApi> = Arc::new(NvrClient::new(&self.config.nvr)?);
        if let Err(e) =
            nvr::wait_until_reachable(api.as_ref(), &self.config.nvr.startup_check, &cancel).await
        {
            error!(server = %self.config.nvr.server, error = %e, "Giving up on NVR");
            return Err(e);
        }

        let processor: Arc<dyn EventSink> = Arc::new(self.build_processor(api.clone())?);

        if let Some(heartbeat) = Heartbeat::from_config(
            &self.config.heartbeat,
            build_client(std::time::Duration::from_secs(10), HeaderMap::new())?,
        ) {
            tokio::spawn(heartbeat.run(cancel.clone()));
        }

        let source = build_source(&self.config.ingest, api);
        info!(source = source.name(), "Starting event source");
        let result = source.run(processor, cancel.clone()).await;
        cancel.cancel();

        match serde_json::to_string(&self.status.snapshot()) {
            Ok(snapshot) => debug!(snapshot = %snapshot, "Final status"),
            Err(e) => debug!(error = %e, "Failed to serialize status"),
        }

        if let Err(e) = &result {
            error!(source = source.name(), error = %e, "Event source stopped");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::domain::DetectionEvent;
    use async_trait::async_trait;
    use bytes::Bytes;

    struct NoNvr;

    #[async_trait]
    impl NvrApi for NoNvr {
        async fn events_after(
            &self,
            _after: f64,
            _limit: Option<u32>,
        ) -> Result<Vec<DetectionEvent>> {
            Ok(Vec::new())
        }

        async fn event(&self, id: &str) -> Result<DetectionEvent> {
            Err(Error::other(format!("no event {}", id)))
        }

        async fn snapshot(&self, _id: &str) -> Result<Option<Bytes>> {
            Ok(None)
        }

        async fn version(&self) -> Result<String> {
            Ok("0.14.0".to_string())
        }
    }

    fn config(json: &str) -> AppConfig {
        AppConfig::from_json(json).unwrap()
    }

    #[test]
    fn test_build_source_by_mode() {
        let api: Arc<dyn NvrApi> = Arc::new(NoNvr);
        let polling = config(r#"{"nvr": {"server": "http://nvr"}}"#);
        assert_eq!(build_source(&polling.ingest, api.clone()).name(), "polling");

        let subscription = config(
            r#"{
                "nvr": {"server": "http://nvr"},
                "ingest": {"mode": "subscription", "host": "broker"}
            }"#,
        );
        assert_eq!(build_source(&subscription.ingest, api).name(), "subscription");
    }

    #[test]
    fn test_build_processor_registers_profiles() {
        let app = App::new(config(
            r#"{
                "nvr": {"server": "http://nvr"},
                "notify": {
                    "ntfy": [{"topic": "cams", "name": "phone"}],
                    "gotify": [{"server": "https://gotify.lan", "token": "t", "enabled": false}]
                }
            }"#,
        ));
        app.build_processor(Arc::new(NoNvr)).unwrap();

        let snapshot = app.status().snapshot();
        assert_eq!(snapshot.profiles.len(), 2);
        assert_eq!(snapshot.profiles[0].name.as_deref(), Some("phone"));
    }

    #[test]
    fn test_build_processor_rejects_bad_timezone() {
        let app = App::new(config(
            r#"{"nvr": {"server": "http://nvr"}, "alerts": {"timezone": "Nowhere/Land"}}"#,
        ));
        assert!(app.build_processor(Arc::new(NoNvr)).is_err());
    }
}
