//! Broker subscription source.
//!
//! Holds one MQTT connection and subscribes to `{prefix}/{mode}`. Transport
//! losses are handled by reconnecting without replay; messages published while
//! disconnected are lost.
//!
//! Until the first successful subscribe, connection and subscribe failures
//! share a small retry budget and exhausting it is fatal. Afterwards the source
//! reconnects indefinitely.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, MqttOptions, Packet, QoS, SubscribeReasonCode,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{EventSink, EventSource, Ingested};
use crate::nvr::wire::{self, ChangeType};
use crate::{Error, Result};

/// Retries allowed after the first failed attempt to subscribe.
const MAX_SUBSCRIBE_RETRIES: u32 = 3;

/// Delay between subscribe attempts.
const SUBSCRIBE_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Capacity of the client request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Which topic to follow.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TopicMode {
    /// Per-detection change messages.
    Events,
    /// Review aggregates.
    #[default]
    Reviews,
}

/// Broker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default)]
    pub topic: TopicMode,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "nvr-notify".to_string()
}

fn default_topic_prefix() -> String {
    "frigate".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

impl MqttConfig {
    /// Full topic name.
    pub fn topic_name(&self) -> String {
        format!("{}/{}", self.topic_prefix.trim_end_matches('/'), self.topic)
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        options
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
}

/// Startup retry accounting.
#[derive(Debug, Default)]
struct SubscribeBudget {
    established: bool,
    failures: u32,
}

impl SubscribeBudget {
    /// Record a failure. Returns `true` once startup should be abandoned.
    fn record_failure(&mut self) -> bool {
        if self.established {
            return false;
        }
        self.failures += 1;
        self.failures > MAX_SUBSCRIBE_RETRIES
    }

    fn mark_subscribed(&mut self) {
        self.established = true;
        self.failures = 0;
    }
}

/// Decode one inbound message for the given topic mode.
pub fn decode_message(mode: TopicMode, payload: &[u8]) -> Result<Ingested> {
    match mode {
        TopicMode::Events => {
            let change = wire::decode_detection_change(payload)?;
            Ok(match change.kind {
                ChangeType::End => Ingested::DetectionEnded(change.after.id),
                ChangeType::New | ChangeType::Update => Ingested::Detection(change.after.into()),
            })
        }
        TopicMode::Reviews => Ok(Ingested::Review(wire::decode_review(payload)?)),
    }
}

/// What the event loop does after handling one event.
#[derive(Debug)]
enum Next {
    /// Keep polling.
    Poll,
    /// Queue a subscribe request, then keep polling.
    Subscribe,
    /// Wait before polling again; with `resubscribe`, queue a subscribe
    /// request after the wait.
    Pause { delay: Duration, resubscribe: bool },
    /// Stop the source.
    Fail(Error),
}

/// Message-driven [`EventSource`] backed by `rumqttc`.
pub struct SubscriptionSource {
    config: MqttConfig,
    topic: String,
    state: watch::Sender<ConnectionState>,
}

impl SubscriptionSource {
    pub fn new(config: MqttConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let topic = config.topic_name();
        Self {
            config,
            topic,
            state,
        }
    }

    /// Observe connection state changes.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(from = %current, to = %state, "MQTT connection state changed");
                *current = state;
                true
            }
        });
    }

    fn subscribe(&self, client: &AsyncClient) {
        if let Err(e) = client.try_subscribe(self.topic.as_str(), QoS::AtMostOnce) {
            warn!(error = %e, "Failed to queue subscribe request");
        }
    }

    fn dispatch(&self, payload: &[u8], sink: &Arc<dyn EventSink>) {
        match decode_message(self.config.topic, payload) {
            Ok(item) => {
                trace!(id = %item.id(), "Received message");
                let sink = sink.clone();
                tokio::spawn(async move {
                    sink.accept(item).await;
                });
            }
            Err(e) => {
                warn!(error = %e, "Dropping undecodable message");
            }
        }
    }

    /// Advance the connection state machine by one event-loop result.
    fn handle_event(
        &self,
        event: std::result::Result<Event, ConnectionError>,
        budget: &mut SubscribeBudget,
        sink: &Arc<dyn EventSink>,
    ) -> Next {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                debug!("Connected to MQTT broker, subscribing");
                self.set_state(ConnectionState::Connecting);
                Next::Subscribe
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let accepted = ack
                    .return_codes
                    .iter()
                    .all(|code| matches!(code, SubscribeReasonCode::Success(_)));
                if accepted {
                    info!(topic = %self.topic, "Subscribed");
                    budget.mark_subscribed();
                    self.set_state(ConnectionState::Subscribed);
                    return Next::Poll;
                }

                warn!(
                    topic = %self.topic,
                    codes = ?ack.return_codes,
                    "Subscribe rejected by broker"
                );
                if budget.record_failure() {
                    error!(topic = %self.topic, "Giving up on subscription");
                    self.set_state(ConnectionState::Disconnected);
                    return Next::Fail(Error::mqtt(format!(
                        "subscribe to '{}' rejected",
                        self.topic
                    )));
                }
                Next::Pause {
                    delay: SUBSCRIBE_RETRY_DELAY,
                    resubscribe: true,
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                self.dispatch(&publish.payload, sink);
                Next::Poll
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker closed the connection");
                self.set_state(ConnectionState::Disconnected);
                Next::Poll
            }
            Ok(_) => Next::Poll,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                if budget.record_failure() {
                    error!(error = %e, "Could not establish MQTT subscription");
                    return Next::Fail(Error::mqtt(e.to_string()));
                }

                let delay = if budget.established {
                    warn!(error = %e, "MQTT connection lost, reconnecting");
                    Duration::from_secs(self.config.reconnect_delay_secs)
                } else {
                    warn!(
                        error = %e,
                        attempt = budget.failures,
                        "MQTT connection failed, retrying"
                    );
                    SUBSCRIBE_RETRY_DELAY
                };
                Next::Pause {
                    delay,
                    resubscribe: false,
                }
            }
        }
    }

    /// Wait out a delay, returning `false` if cancelled first.
    async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[async_trait]
impl EventSource for SubscriptionSource {
    fn name(&self) -> &'static str {
        "subscription"
    }

    async fn run(&self, sink: Arc<dyn EventSink>, cancel: CancellationToken) -> Result<()> {
        let (client, mut eventloop) =
            AsyncClient::new(self.config.options(), REQUEST_CHANNEL_CAPACITY);
        let mut budget = SubscribeBudget::default();

        info!(
            host = %self.config.host,
            port = self.config.port,
            topic = %self.topic,
            "Connecting to MQTT broker"
        );
        self.set_state(ConnectionState::Connecting);

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = eventloop.poll() => event,
            };

            match self.handle_event(event, &mut budget, &sink) {
                Next::Poll => {}
                Next::Subscribe => self.subscribe(&client),
                Next::Pause { delay, resubscribe } => {
                    if !Self::pause(delay, &cancel).await {
                        break;
                    }
                    if resubscribe {
                        self.subscribe(&client);
                    } else {
                        self.set_state(ConnectionState::Connecting);
                    }
                }
                Next::Fail(e) => return Err(e),
            }
        }

        debug!("Subscription source shutting down");
        if let Err(e) = client.try_disconnect() {
            trace!(error = %e, "Disconnect request not delivered");
        }
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }
}
