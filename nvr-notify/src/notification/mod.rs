//! Notification routing.
//!
//! This module provides:
//! - Notification profiles and their per-profile filters
//! - Message templates
//! - The dispatcher that fans alerts out to profiles
//! - Senders for each provider kind

pub mod channels;
mod context;
mod dispatch;
mod profile;
mod template;

pub use channels::{AlertMessage, AlertSender};
pub use context::AlertContext;
pub use dispatch::{Alert, DEFAULT_SEND_TIMEOUT, DispatchOutcome, DispatchReport, Dispatcher};
pub use profile::{
    NotificationProfile, ProfileConfig, ProfileFilter, ProfileKey, ProviderKind, SkipReason,
};
pub use template::{MessageTemplate, Placeholder, TemplateValues};

use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::Result;
use channels::{
    DiscordConfig, DiscordSender, GotifyConfig, GotifySender, NtfyConfig, NtfySender,
    TelegramConfig, TelegramSender, WebhookConfig, WebhookSender,
};

/// Configured profiles, grouped by provider kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub discord: Vec<ProfileConfig<DiscordConfig>>,
    #[serde(default)]
    pub telegram: Vec<ProfileConfig<TelegramConfig>>,
    #[serde(default)]
    pub webhook: Vec<ProfileConfig<WebhookConfig>>,
    #[serde(default)]
    pub ntfy: Vec<ProfileConfig<NtfyConfig>>,
    #[serde(default)]
    pub gotify: Vec<ProfileConfig<GotifyConfig>>,
}

impl NotifyConfig {
    /// Number of enabled profiles across all kinds.
    pub fn enabled_count(&self) -> usize {
        self.discord.iter().filter(|p| p.enabled).count()
            + self.telegram.iter().filter(|p| p.enabled).count()
            + self.webhook.iter().filter(|p| p.enabled).count()
            + self.ntfy.iter().filter(|p| p.enabled).count()
            + self.gotify.iter().filter(|p| p.enabled).count()
    }

    /// Visit every profile's common settings with its key.
    pub fn for_each_profile(
        &self,
        mut f: impl FnMut(ProfileKey, &ProfileFilter, Option<&MessageTemplate>),
    ) {
        fn visit<T>(
            kind: ProviderKind,
            list: &[ProfileConfig<T>],
            f: &mut impl FnMut(ProfileKey, &ProfileFilter, Option<&MessageTemplate>),
        ) {
            for (index, profile) in list.iter().enumerate() {
                f(ProfileKey::new(kind, index), &profile.filters, profile.template.as_ref());
            }
        }

        visit(ProviderKind::Discord, &self.discord, &mut f);
        visit(ProviderKind::Telegram, &self.telegram, &mut f);
        visit(ProviderKind::Webhook, &self.webhook, &mut f);
        visit(ProviderKind::Ntfy, &self.ntfy, &mut f);
        visit(ProviderKind::Gotify, &self.gotify, &mut f);
    }

    /// Build runtime profiles, all sharing one HTTP client.
    pub fn build_profiles(&self, client: &Client) -> Result<Vec<NotificationProfile>> {
        let mut profiles = Vec::new();

        for (index, config) in self.discord.iter().enumerate() {
            let sender = DiscordSender::new(config.settings.clone(), client.clone());
            profiles.push(NotificationProfile::from_config(
                ProfileKey::new(ProviderKind::Discord, index),
                config,
                Arc::new(sender),
            )?);
        }
        for (index, config) in self.telegram.iter().enumerate() {
            let sender = TelegramSender::new(config.settings.clone(), client.clone());
            profiles.push(NotificationProfile::from_config(
                ProfileKey::new(ProviderKind::Telegram, index),
                config,
                Arc::new(sender),
            )?);
        }
        for (index, config) in self.webhook.iter().enumerate() {
            let sender = WebhookSender::new(config.settings.clone(), client.clone());
            profiles.push(NotificationProfile::from_config(
                ProfileKey::new(ProviderKind::Webhook, index),
                config,
                Arc::new(sender),
            )?);
        }
        for (index, config) in self.ntfy.iter().enumerate() {
            let sender = NtfySender::new(config.settings.clone(), client.clone());
            profiles.push(NotificationProfile::from_config(
                ProfileKey::new(ProviderKind::Ntfy, index),
                config,
                Arc::new(sender),
            )?);
        }
        for (index, config) in self.gotify.iter().enumerate() {
            let sender = GotifySender::new(config.settings.clone(), client.clone());
            profiles.push(NotificationProfile::from_config(
                ProfileKey::new(ProviderKind::Gotify, index),
                config,
                Arc::new(sender),
            )?);
        }

        Ok(profiles)
    }
}
