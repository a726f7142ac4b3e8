//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use rr_core::{
    CategoryId, ChannelFormat, ChannelHierarchy, ChannelId, GuildId, HistoryDetail, Rule, Scope,
    UserFormat,
};

/// Voice call notifier.
///
/// Posts a status message when a voice call starts, keeps it current while
/// the call goes on, and replaces it with a summary and timeline when the
/// call ends.
#[derive(Debug, Parser)]
#[command(name = "ringring", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show configuration and stored rule counts.
    Status,

    /// Manage notification rules.
    #[command(subcommand)]
    Rules(RulesAction),

    /// Render a timeline PNG from a JSON request.
    Render {
        /// Path to the render request.
        request: PathBuf,

        /// Where to write the PNG.
        #[arg(short, long)]
        output: PathBuf,

        /// Also post the image to this notification channel's webhook.
        #[arg(long)]
        post_to: Option<ChannelId>,
    },

    /// Replay a recorded voice-state script through the call tracker.
    Replay {
        /// Path to the replay script.
        script: PathBuf,

        /// Print status messages instead of posting them.
        #[arg(long)]
        dry_run: bool,

        /// Write each message's latest timeline image into this directory.
        #[arg(long, requires = "dry_run")]
        images: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum RulesAction {
    /// Create or replace the rule for a guild, category or channel.
    Set {
        #[command(flatten)]
        target: RuleTarget,

        /// Disable tracking at this scope.
        #[arg(long)]
        disabled: bool,

        /// Text channel that receives status messages.
        #[arg(long)]
        notify: Option<ChannelId>,

        /// none, name, name_with_duration, name_with_duration_and_timeline.
        #[arg(long, default_value = "name_with_duration")]
        history: HistoryDetail,

        /// username, display, mention.
        #[arg(long, default_value = "display")]
        user_format: UserFormat,

        /// display, mention.
        #[arg(long, default_value = "display")]
        channel_format: ChannelFormat,
    },

    /// Delete the rule for a guild, category or channel.
    Remove {
        #[command(flatten)]
        target: RuleTarget,
    },

    /// List stored rules.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the rule that applies to a voice channel.
    Resolve {
        #[arg(long)]
        guild: GuildId,

        #[arg(long)]
        category: Option<CategoryId>,

        #[arg(long)]
        channel: ChannelId,
    },
}

#[derive(Debug, Clone, Copy, Args)]
pub struct RuleTarget {
    /// guild, category or channel.
    #[arg(long)]
    pub scope: Scope,

    /// ID of the guild, category or channel.
    #[arg(long)]
    pub id: u64,
}

impl RulesAction {
    /// The rule described by `rules set` flags.
    pub fn rule(&self) -> Option<Rule> {
        match self {
            Self::Set {
                disabled,
                notify,
                history,
                user_format,
                channel_format,
                ..
            } => Some(Rule {
                enabled: !disabled,
                notification_channel: *notify,
                history: *history,
                user_format: *user_format,
                channel_format: *channel_format,
            }),
            _ => None,
        }
    }

    pub const fn hierarchy(&self) -> Option<ChannelHierarchy> {
        match self {
            Self::Resolve {
                guild,
                category,
                channel,
            } => Some(ChannelHierarchy {
                guild: *guild,
                category: *category,
                channel: *channel,
            }),
            _ => None,
        }
    }
}
