//! Outbound status messages.

use async_trait::async_trait;
use rr_core::{ChannelId, StatusReport};
use thiserror::Error;

/// A PNG file sent alongside a status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub png: Vec<u8>,
}

/// Report text plus an optional timeline image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub report: StatusReport,
    pub attachment: Option<Attachment>,
}

impl StatusMessage {
    pub const fn text(report: StatusReport) -> Self {
        Self {
            report,
            attachment: None,
        }
    }
}

/// Identifies a published message so it can be edited later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub channel: ChannelId,
    pub message_id: String,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("no destination configured for channel {0}")]
    NoRoute(ChannelId),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

/// Where status messages are published.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Posts a new message to `target`.
    async fn publish(
        &self,
        target: ChannelId,
        message: StatusMessage,
    ) -> Result<MessageHandle, SinkError>;

    /// Replaces the content of a previously published message.
    async fn update(&self, handle: &MessageHandle, message: StatusMessage)
    -> Result<(), SinkError>;
}
