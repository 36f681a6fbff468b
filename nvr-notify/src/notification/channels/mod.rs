//! Alert senders.
//!
//! This module provides one sender per provider kind:
//! - Discord webhooks
//! - Telegram Bot API
//! - Generic webhooks (HTTP POST/PUT)
//! - ntfy topics
//! - Gotify servers
//!
//! Senders only translate a rendered [`AlertMessage`] into their wire format.
//! Filtering, templating and outcome tracking happen in the dispatcher.

mod discord;
mod gotify;
mod ntfy;
mod telegram;
mod webhook;

pub use discord::{DiscordConfig, DiscordSender};
pub use gotify::{GotifyConfig, GotifySender};
pub use ntfy::{NtfyConfig, NtfySender};
pub use telegram::{TelegramConfig, TelegramSender};
pub use webhook::{WebhookAuth, WebhookConfig, WebhookSender};

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::context::AlertContext;
use super::profile::ProviderKind;
use crate::Result;
use crate::domain::EventLinks;

/// Maximum number of retries for rate-limited requests.
pub(crate) const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Wait used when a rate-limited response carries no hint.
pub(crate) const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// File name used for snapshot attachments.
pub(crate) const SNAPSHOT_FILE_NAME: &str = "snapshot.jpg";

/// A rendered alert, ready for a sender.
#[derive(Debug, Clone, Serialize)]
pub struct AlertMessage {
    pub title: String,
    pub body: String,
    /// Snapshot image, shared by every profile of one alert.
    #[serde(skip)]
    pub image: Option<Bytes>,
    pub links: EventLinks,
    /// Attribute sets of the alert, for senders that forward them.
    pub context: AlertContext,
    pub event_id: String,
    pub camera: String,
    pub label: String,
    pub timestamp: DateTime<Utc>,
}

/// Trait for alert senders.
#[async_trait]
pub trait AlertSender: Send + Sync {
    /// The provider this sender talks to.
    fn provider(&self) -> ProviderKind;

    /// Deliver one message.
    async fn send(&self, message: &AlertMessage) -> Result<()>;
}

/// Truncate to `limit` characters, marking the cut.
pub(crate) fn truncate_text(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let suffix = "…";
    let truncated: String = text.chars().take(limit.saturating_sub(1)).collect();
    format!("{truncated}{suffix}")
}
