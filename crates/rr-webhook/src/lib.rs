//! Webhook delivery for call status messages.
//!
//! [`WebhookSink`] posts status reports as Discord-compatible webhook
//! messages: one embed, plus the timeline PNG as a multipart file when the
//! message carries one. Each notification channel maps to its own webhook URL.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use rr_call::{MessageHandle, NotificationSink, SinkError, StatusMessage};
use rr_core::ChannelId;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

pub mod avatar;

pub use avatar::HttpAvatarSupplier;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("ringring/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid webhook URL for channel {channel}: {reason}")]
    InvalidUrl {
        channel: ChannelId,
        reason: &'static str,
    },
    #[error("no webhook configured for channel {0}")]
    NoRoute(ChannelId),
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<WebhookError> for SinkError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::NoRoute(channel) => Self::NoRoute(channel),
            WebhookError::Status { status, body } => Self::Rejected { status, body },
            WebhookError::InvalidResponse(message) => Self::InvalidResponse(message),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Publishes status messages through per-channel webhooks.
///
/// Cloning shares the underlying connection pool.
#[derive(Clone)]
pub struct WebhookSink {
    http: reqwest::Client,
    routes: HashMap<ChannelId, String>,
}

impl fmt::Debug for WebhookSink {
    // webhook URLs embed their token
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let routes: BTreeMap<_, _> = self
            .routes
            .keys()
            .map(|channel| (channel.get(), "[REDACTED]"))
            .collect();
        f.debug_struct("WebhookSink")
            .field("routes", &routes)
            .finish_non_exhaustive()
    }
}

impl WebhookSink {
    /// Creates a sink routing each notification channel to its webhook URL.
    pub fn new(routes: HashMap<ChannelId, String>) -> Result<Self, WebhookError> {
        let mut validated = HashMap::with_capacity(routes.len());
        for (channel, url) in routes {
            validated.insert(channel, validate_url(channel, &url)?);
        }
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(WebhookError::ClientBuild)?;
        Ok(Self {
            http,
            routes: validated,
        })
    }

    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.routes.keys().copied()
    }

    /// Posts a new message and returns its handle.
    pub async fn create(
        &self,
        target: ChannelId,
        message: &StatusMessage,
    ) -> Result<MessageHandle, WebhookError> {
        let url = format!("{}?wait=true", self.route(target)?);
        let request = with_body(self.http.post(url), message)?;
        let body = send(request).await?;
        let message_id = parse_message_id(&body)?;
        tracing::debug!(channel_id = %target, message_id = %message_id, "webhook message created");
        Ok(MessageHandle {
            channel: target,
            message_id,
        })
    }

    /// Replaces the content and attachments of a message posted by `create`.
    pub async fn edit(
        &self,
        handle: &MessageHandle,
        message: &StatusMessage,
    ) -> Result<(), WebhookError> {
        let url = message_url(self.route(handle.channel)?, &handle.message_id);
        let request = with_body(self.http.patch(url), message)?;
        send(request).await?;
        tracing::debug!(channel_id = %handle.channel, message_id = %handle.message_id, "webhook message edited");
        Ok(())
    }

    fn route(&self, channel: ChannelId) -> Result<&str, WebhookError> {
        self.routes
            .get(&channel)
            .map(String::as_str)
            .ok_or(WebhookError::NoRoute(channel))
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn publish(
        &self,
        target: ChannelId,
        message: StatusMessage,
    ) -> Result<MessageHandle, SinkError> {
        Ok(self.create(target, &message).await?)
    }

    async fn update(&self, handle: &MessageHandle, message: StatusMessage) -> Result<(), SinkError> {
        Ok(self.edit(handle, &message).await?)
    }
}

fn validate_url(channel: ChannelId, url: &str) -> Result<String, WebhookError> {
    let url = url.trim().trim_end_matches('/');
    if url.is_empty() {
        return Err(WebhookError::InvalidUrl {
            channel,
            reason: "URL cannot be empty",
        });
    }
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(WebhookError::InvalidUrl {
            channel,
            reason: "URL must be http or https",
        });
    }
    if url.contains('?') {
        return Err(WebhookError::InvalidUrl {
            channel,
            reason: "URL cannot carry a query string",
        });
    }
    Ok(url.to_string())
}

fn message_url(base: &str, message_id: &str) -> String {
    format!("{base}/messages/{message_id}")
}

/// JSON body for a webhook execute or edit request.
///
/// `attachments` is always present so an edit drops files from the previous
/// revision.
pub fn payload(message: &StatusMessage) -> Value {
    let attachments: Vec<Value> = message
        .attachment
        .iter()
        .enumerate()
        .map(|(id, attachment)| json!({ "id": id, "filename": attachment.filename }))
        .collect();
    json!({
        "embeds": [message.report],
        "attachments": attachments,
        "allowed_mentions": { "parse": [] },
    })
}

fn with_body(
    request: reqwest::RequestBuilder,
    message: &StatusMessage,
) -> Result<reqwest::RequestBuilder, WebhookError> {
    let payload = payload(message);
    let Some(attachment) = &message.attachment else {
        return Ok(request.json(&payload));
    };
    let file = Part::bytes(attachment.png.clone())
        .file_name(attachment.filename.clone())
        .mime_str("image/png")?;
    let form = Form::new()
        .text("payload_json", serde_json::to_string(&payload)?)
        .part("files[0]", file);
    Ok(request.multipart(form))
}

async fn send(request: reqwest::RequestBuilder) -> Result<String, WebhookError> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(WebhookError::Status {
            status: status.as_u16(),
            body: truncate_for_error(&body),
        });
    }
    Ok(body)
}

fn parse_message_id(body: &str) -> Result<String, WebhookError> {
    #[derive(Deserialize)]
    struct Created {
        id: String,
    }

    serde_json::from_str::<Created>(body)
        .map(|created| created.id)
        .map_err(|err| WebhookError::InvalidResponse(err.to_string()))
}

fn truncate_for_error(body: &str) -> String {
    const MAX_LEN: usize = 200;
    if body.chars().count() <= MAX_LEN {
        body.to_string()
    } else {
        format!("{}...", body.chars().take(MAX_LEN).collect::<String>())
    }
}
