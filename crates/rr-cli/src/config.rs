//! Configuration loading and management.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::FixedOffset;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use rr_call::{AvatarPolicy, HandlerConfig, RetryPolicy};
use rr_core::{ChannelId, ReportLabels};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the rule database.
    pub database_path: PathBuf,
    pub refresh_cooldown_secs: u64,
    pub refresh_interval_secs: u64,
    pub close_grace_secs: u64,
    pub close_retry_attempts: u32,
    pub close_retry_initial_delay_secs: u64,
    /// Avatar URL template containing `{user}`. Timelines have no avatars when unset.
    pub avatar_url: Option<String>,
    pub avatar_required: bool,
    pub avatar_ttl_secs: u64,
    pub avatar_cache_capacity: usize,
    /// Offset for timeline tick labels.
    pub utc_offset_minutes: i32,
    /// Notification channel ID → webhook URL.
    pub webhooks: BTreeMap<String, String>,
    pub labels: ReportLabels,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let webhooks: BTreeMap<&str, &str> = self
            .webhooks
            .keys()
            .map(|channel| (channel.as_str(), "[REDACTED]"))
            .collect();
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("refresh_cooldown_secs", &self.refresh_cooldown_secs)
            .field("refresh_interval_secs", &self.refresh_interval_secs)
            .field("close_grace_secs", &self.close_grace_secs)
            .field("close_retry_attempts", &self.close_retry_attempts)
            .field(
                "close_retry_initial_delay_secs",
                &self.close_retry_initial_delay_secs,
            )
            .field("avatar_url", &self.avatar_url)
            .field("avatar_required", &self.avatar_required)
            .field("avatar_ttl_secs", &self.avatar_ttl_secs)
            .field("avatar_cache_capacity", &self.avatar_cache_capacity)
            .field("utc_offset_minutes", &self.utc_offset_minutes)
            .field("webhooks", &webhooks)
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        let handler = HandlerConfig::default();
        Self {
            database_path: data_dir.join("rules.db"),
            refresh_cooldown_secs: handler.refresh_cooldown.as_secs(),
            refresh_interval_secs: handler.refresh_interval.as_secs(),
            close_grace_secs: handler.close_grace.as_secs(),
            close_retry_attempts: handler.close_retry.attempts,
            close_retry_initial_delay_secs: handler.close_retry.initial_delay.as_secs(),
            avatar_url: None,
            avatar_required: false,
            avatar_ttl_secs: 3600,
            avatar_cache_capacity: 256,
            utc_offset_minutes: 0,
            webhooks: BTreeMap::new(),
            labels: ReportLabels::default(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // RR_DATABASE_PATH, RR_CLOSE_GRACE_SECS, ...
        figment = figment.merge(Env::prefixed("RR_"));

        figment.extract()
    }

    pub fn handler_config(&self) -> Result<HandlerConfig> {
        let utc_offset = FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .with_context(|| {
                format!(
                    "utc_offset_minutes out of range: {}",
                    self.utc_offset_minutes
                )
            })?;
        Ok(HandlerConfig {
            refresh_cooldown: Duration::from_secs(self.refresh_cooldown_secs),
            refresh_interval: Duration::from_secs(self.refresh_interval_secs.max(1)),
            close_grace: Duration::from_secs(self.close_grace_secs),
            close_retry: RetryPolicy {
                attempts: self.close_retry_attempts.max(1),
                initial_delay: Duration::from_secs(self.close_retry_initial_delay_secs),
            },
            utc_offset,
            avatar_policy: if self.avatar_required {
                AvatarPolicy::Required
            } else {
                AvatarPolicy::Optional
            },
            labels: self.labels.clone(),
        })
    }

    /// Parses the webhook table keys into channel IDs.
    pub fn webhook_routes(&self) -> Result<HashMap<ChannelId, String>> {
        self.webhooks
            .iter()
            .map(|(channel, url)| {
                let channel = channel
                    .parse::<ChannelId>()
                    .with_context(|| format!("invalid webhook channel key {channel:?}"))?;
                Ok((channel, url.clone()))
            })
            .collect()
    }
}

/// Returns the platform-specific config directory for ringring.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ringring"))
}

/// Returns the platform-specific data directory for ringring.
///
/// On Linux: `~/.local/share/ringring`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("ringring"))
}
