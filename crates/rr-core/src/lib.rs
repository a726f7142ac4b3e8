//! Core domain logic for voice-call tracking.
//!
//! This crate contains the fundamental types and logic for:
//! - Participants: presence, status, and streaming intervals
//! - Sessions: one occupancy period of a voice channel
//! - Rules: per-scope display policy and its resolution
//! - Reports: status message content for ongoing and ended calls

pub mod format;
pub mod participant;
pub mod report;
pub mod rule;
pub mod session;
pub mod types;

pub use format::{Precision, TimeUnits, format_duration};
pub use participant::{Interval, Participant, PresenceInterval};
pub use report::{ReportField, ReportImage, ReportLabels, StatusReport, TIMELINE_ATTACHMENT};
pub use rule::{
    ChannelFormat, ChannelHierarchy, HistoryDetail, Rule, RuleBook, RuleResolver, Scope,
    UserFormat,
};
pub use session::{Session, SessionError};
pub use types::{
    CategoryId, ChannelId, ChannelProfile, GuildId, MemberProfile, UserId, ValidationError,
    VoiceStatus,
};
