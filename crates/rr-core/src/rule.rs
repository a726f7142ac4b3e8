//! Display rules: whether and how a channel's calls are reported.
//!
//! Rules are configured per guild, per category, or per channel. The most
//! specific configured scope wins; with nothing configured, reporting is
//! disabled.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{CategoryId, ChannelId, ChannelProfile, GuildId, MemberProfile, ValidationError};

/// How much participant history a status message shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryDetail {
    #[default]
    None,
    #[serde(rename = "name")]
    NameOnly,
    NameWithDuration,
    NameWithDurationAndTimeline,
}

impl HistoryDetail {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::NameOnly => "name",
            Self::NameWithDuration => "name_with_duration",
            Self::NameWithDurationAndTimeline => "name_with_duration_and_timeline",
        }
    }

    pub const fn shows_names(self) -> bool {
        !matches!(self, Self::None)
    }

    pub const fn shows_durations(self) -> bool {
        matches!(
            self,
            Self::NameWithDuration | Self::NameWithDurationAndTimeline
        )
    }

    pub const fn shows_timeline(self) -> bool {
        matches!(self, Self::NameWithDurationAndTimeline)
    }
}

impl fmt::Display for HistoryDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryDetail {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "name" => Ok(Self::NameOnly),
            "name_with_duration" => Ok(Self::NameWithDuration),
            "name_with_duration_and_timeline" => Ok(Self::NameWithDurationAndTimeline),
            _ => Err(ValidationError::UnknownVariant {
                field: "history detail",
                value: s.to_string(),
            }),
        }
    }
}

/// How a participant is labelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserFormat {
    Username,
    #[default]
    Display,
    Mention,
}

impl UserFormat {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Display => "display",
            Self::Mention => "mention",
        }
    }

    pub fn format(self, member: &MemberProfile) -> String {
        match self {
            Self::Username => member.username.clone(),
            Self::Display => member.effective_name().to_string(),
            Self::Mention => format!("<@{}>", member.id),
        }
    }
}

impl fmt::Display for UserFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "username" => Ok(Self::Username),
            "display" => Ok(Self::Display),
            "mention" => Ok(Self::Mention),
            _ => Err(ValidationError::UnknownVariant {
                field: "user format",
                value: s.to_string(),
            }),
        }
    }
}

/// How the voice channel is labelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelFormat {
    #[default]
    Display,
    Mention,
}

impl ChannelFormat {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Display => "display",
            Self::Mention => "mention",
        }
    }

    pub fn format(self, channel: &ChannelProfile) -> String {
        match self {
            Self::Display => channel.name.clone(),
            Self::Mention => format!("<#{}>", channel.id),
        }
    }
}

impl fmt::Display for ChannelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "display" => Ok(Self::Display),
            "mention" => Ok(Self::Mention),
            _ => Err(ValidationError::UnknownVariant {
                field: "channel format",
                value: s.to_string(),
            }),
        }
    }
}

/// The effective display policy for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rule {
    pub enabled: bool,
    /// Text channel that receives status messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_channel: Option<ChannelId>,
    #[serde(default)]
    pub history: HistoryDetail,
    #[serde(default)]
    pub user_format: UserFormat,
    #[serde(default)]
    pub channel_format: ChannelFormat,
}

impl Rule {
    /// An enabled rule posting to `target` with default formatting.
    pub fn enabled_for(target: ChannelId) -> Self {
        Self {
            enabled: true,
            notification_channel: Some(target),
            ..Self::default()
        }
    }
}

/// Where a rule was configured. Ordered from least to most specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Guild,
    Category,
    Channel,
}

impl Scope {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Guild => "guild",
            Self::Category => "category",
            Self::Channel => "channel",
        }
    }

    /// Stable integer code for storage. Never reorder.
    pub const fn code(self) -> i64 {
        match self {
            Self::Guild => 0,
            Self::Category => 1,
            Self::Channel => 2,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, ValidationError> {
        match code {
            0 => Ok(Self::Guild),
            1 => Ok(Self::Category),
            2 => Ok(Self::Channel),
            _ => Err(ValidationError::UnknownVariant {
                field: "scope",
                value: code.to_string(),
            }),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guild" => Ok(Self::Guild),
            "category" => Ok(Self::Category),
            "channel" => Ok(Self::Channel),
            _ => Err(ValidationError::UnknownVariant {
                field: "scope",
                value: s.to_string(),
            }),
        }
    }
}

/// Position of a channel in its guild, used for rule resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelHierarchy {
    pub guild: GuildId,
    pub category: Option<CategoryId>,
    pub channel: ChannelId,
}

impl From<&ChannelProfile> for ChannelHierarchy {
    fn from(channel: &ChannelProfile) -> Self {
        Self {
            guild: channel.guild_id,
            category: channel.category_id,
            channel: channel.id,
        }
    }
}

/// Resolves the effective rule for a channel.
pub trait RuleResolver: Send + Sync {
    /// Returns the effective rule and the scope it came from.
    fn scoped_effective_rule(&self, hierarchy: &ChannelHierarchy) -> (Rule, Scope);

    fn effective_rule(&self, hierarchy: &ChannelHierarchy) -> Rule {
        self.scoped_effective_rule(hierarchy).0
    }
}

/// In-memory rule set keyed by scope.
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    guilds: HashMap<u64, Rule>,
    categories: HashMap<u64, Rule>,
    channels: HashMap<u64, Rule>,
}

impl RuleBook {
    pub fn set(&mut self, scope: Scope, id: u64, rule: Rule) {
        self.scope_mut(scope).insert(id, rule);
    }

    pub fn remove(&mut self, scope: Scope, id: u64) -> Option<Rule> {
        self.scope_mut(scope).remove(&id)
    }

    pub fn get(&self, scope: Scope, id: u64) -> Option<&Rule> {
        match scope {
            Scope::Guild => self.guilds.get(&id),
            Scope::Category => self.categories.get(&id),
            Scope::Channel => self.channels.get(&id),
        }
    }

    pub fn len(&self) -> usize {
        self.guilds.len() + self.categories.len() + self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn scope_mut(&mut self, scope: Scope) -> &mut HashMap<u64, Rule> {
        match scope {
            Scope::Guild => &mut self.guilds,
            Scope::Category => &mut self.categories,
            Scope::Channel => &mut self.channels,
        }
    }
}

impl RuleResolver for RuleBook {
    fn scoped_effective_rule(&self, hierarchy: &ChannelHierarchy) -> (Rule, Scope) {
        if let Some(rule) = self.channels.get(&hierarchy.channel.get()) {
            return (rule.clone(), Scope::Channel);
        }
        if let Some(rule) = hierarchy
            .category
            .and_then(|category| self.categories.get(&category.get()))
        {
            return (rule.clone(), Scope::Category);
        }
        if let Some(rule) = self.guilds.get(&hierarchy.guild.get()) {
            return (rule.clone(), Scope::Guild);
        }
        (Rule::default(), Scope::Guild)
    }
}
