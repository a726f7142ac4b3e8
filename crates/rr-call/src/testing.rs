//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rr_core::{ChannelId, MemberProfile, UserId};

use crate::clock::RuntimeClock;
use crate::config::HandlerConfig;
use crate::handler::CallContext;
use crate::sink::{MessageHandle, NotificationSink, SinkError, StatusMessage};

pub fn ts(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 20, 0, 0)
        .single()
        .expect("valid test timestamp")
        + Duration::seconds(seconds)
}

/// A member whose display name is the capitalized username.
pub fn member(id: u64, username: &str) -> MemberProfile {
    let mut chars = username.chars();
    let display = chars
        .next()
        .map(|first| first.to_uppercase().chain(chars).collect::<String>());
    MemberProfile {
        id: UserId::new(id).unwrap(),
        username: username.to_string(),
        display_name: display,
    }
}

pub fn context(sink: &Arc<RecordingSink>) -> Arc<CallContext> {
    context_with(sink, HandlerConfig::default())
}

pub fn context_with(sink: &Arc<RecordingSink>, config: HandlerConfig) -> Arc<CallContext> {
    Arc::new(CallContext::new(
        sink.clone(),
        Arc::new(RuntimeClock::new(ts(0))),
        config,
    ))
}

/// Lets spawned tasks run to their next suspension point.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Records everything it is asked to publish.
#[derive(Default)]
pub struct RecordingSink {
    published: Mutex<Vec<(ChannelId, StatusMessage)>>,
    updates: Mutex<Vec<(MessageHandle, StatusMessage)>>,
    fail_publish: AtomicBool,
    publish_delay: Mutex<Option<std::time::Duration>>,
    failing_updates: AtomicUsize,
    update_attempts: AtomicUsize,
}

impl RecordingSink {
    pub fn published(&self) -> Vec<(ChannelId, StatusMessage)> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn updates(&self) -> Vec<(MessageHandle, StatusMessage)> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_attempts(&self) -> usize {
        self.update_attempts.load(Ordering::SeqCst)
    }

    pub fn fail_publishes(&self) {
        self.fail_publish.store(true, Ordering::SeqCst);
    }

    /// Makes each publish take `delay` before it lands.
    pub fn delay_publishes(&self, delay: std::time::Duration) {
        *self.publish_delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    pub fn fail_next_updates(&self, count: usize) {
        self.failing_updates.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(
        &self,
        target: ChannelId,
        message: StatusMessage,
    ) -> Result<MessageHandle, SinkError> {
        let delay = *self.publish_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(SinkError::Transport("connection refused".to_string()));
        }
        let mut published = self.published.lock().unwrap_or_else(PoisonError::into_inner);
        published.push((target, message));
        Ok(MessageHandle {
            channel: target,
            message_id: format!("m{}", published.len()),
        })
    }

    async fn update(&self, handle: &MessageHandle, message: StatusMessage) -> Result<(), SinkError> {
        self.update_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(SinkError::Rejected {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((handle.clone(), message));
        Ok(())
    }
}
