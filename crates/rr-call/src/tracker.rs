//! Turns platform voice-state changes into handler calls.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rr_core::{
    ChannelHierarchy, ChannelId, ChannelProfile, MemberProfile, RuleResolver, Session, VoiceStatus,
};
use thiserror::Error;

use crate::handler::{HandlerError, SessionHandler};
use crate::manager::{ManagerError, SessionManager};
use crate::tasks::spawn_refresh_loop;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error(transparent)]
    Manager(#[from] ManagerError),
}

/// A member's voice state as reported by the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceState {
    /// The channel the member is connected to, if any.
    pub channel: Option<ChannelProfile>,
    pub self_mute: bool,
    pub self_deaf: bool,
    pub guild_mute: bool,
    pub guild_deaf: bool,
    pub self_stream: bool,
}

impl VoiceState {
    pub fn in_channel(channel: ChannelProfile) -> Self {
        Self {
            channel: Some(channel),
            ..Self::default()
        }
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel.as_ref().map(|channel| channel.id)
    }

    /// Self and server mutes both count.
    pub const fn status(&self) -> VoiceStatus {
        VoiceStatus::new(
            self.self_mute || self.guild_mute,
            self.self_deaf || self.guild_deaf,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceStateChange {
    pub member: MemberProfile,
    pub before: VoiceState,
    pub after: VoiceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Join(ChannelId),
    Leave(ChannelId),
    Move { from: ChannelId, to: ChannelId },
    /// Mute, deafen or stream change within one channel.
    Update(ChannelId),
    /// Not connected before or after.
    Idle,
}

pub fn classify(change: &VoiceStateChange) -> Transition {
    match (change.before.channel_id(), change.after.channel_id()) {
        (None, None) => Transition::Idle,
        (Some(from), None) => Transition::Leave(from),
        (None, Some(to)) => Transition::Join(to),
        (Some(from), Some(to)) if from != to => Transition::Move { from, to },
        (Some(_), Some(to)) => Transition::Update(to),
    }
}

/// Routes voice-state changes to the handler of each affected channel,
/// starting calls for channels whose rule is enabled.
pub struct CallTracker {
    manager: Arc<SessionManager>,
    rules: Arc<dyn RuleResolver>,
}

impl CallTracker {
    pub fn new(manager: Arc<SessionManager>, rules: Arc<dyn RuleResolver>) -> Self {
        Self { manager, rules }
    }

    pub const fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub async fn handle(&self, change: &VoiceStateChange) -> Result<(), TrackerError> {
        let now = self.manager.context().clock.now();
        let member = &change.member;
        let transition = classify(change);
        tracing::debug!(participant = %member.id, ?transition, "voice state changed");

        match transition {
            Transition::Idle => Ok(()),
            Transition::Leave(from) => self.leave(from, member, now).await,
            Transition::Join(_) => self.join_after(change, now).await,
            Transition::Move { from, .. } => {
                let left = self.leave(from, member, now).await;
                if let Err(err) = &left {
                    tracing::warn!(channel_id = %from, participant = %member.id, error = %err, "leave during move failed");
                }
                self.join_after(change, now).await?;
                left
            }
            Transition::Update(channel) => self.update(channel, change, now).await,
        }
    }

    /// Joins members found already connected at startup. Returns how many
    /// were tracked.
    pub async fn restore(&self, connected: &[(MemberProfile, VoiceState)]) -> usize {
        let now = self.manager.context().clock.now();
        let mut tracked = 0;
        for (member, state) in connected {
            let Some(channel) = &state.channel else {
                continue;
            };
            match self.join(channel, member, state, now).await {
                Ok(()) => tracked += 1,
                Err(err) => {
                    tracing::warn!(channel_id = %channel.id, participant = %member.id, error = %err, "failed to restore member");
                }
            }
        }
        tracing::info!(tracked, sessions = self.manager.len(), "restored voice states");
        tracked
    }

    async fn join_after(&self, change: &VoiceStateChange, now: DateTime<Utc>) -> Result<(), TrackerError> {
        match &change.after.channel {
            Some(channel) => self.join(channel, &change.member, &change.after, now).await,
            None => Ok(()),
        }
    }

    async fn join(
        &self,
        channel: &ChannelProfile,
        member: &MemberProfile,
        state: &VoiceState,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let mut retried = false;
        loop {
            let Some(handler) = self.open_handler(channel, now).await? else {
                return Ok(());
            };
            match enter(&handler, member, state, now).await {
                // closed between resolve and join; the next attempt starts a new call
                Err(HandlerError::Closed(_)) if !retried => retried = true,
                result => return result.map_err(Into::into),
            }
        }
    }

    async fn open_handler(
        &self,
        channel: &ChannelProfile,
        now: DateTime<Utc>,
    ) -> Result<Option<Arc<SessionHandler>>, TrackerError> {
        if let Some(handler) = self.manager.resolve(channel.id) {
            return Ok(Some(handler));
        }

        let (rule, scope) = self.rules.scoped_effective_rule(&ChannelHierarchy::from(channel));
        if !rule.enabled {
            tracing::debug!(channel_id = %channel.id, %scope, "calls not tracked here");
            return Ok(None);
        }
        let label = rule.channel_format.format(channel);
        match self.manager.add(Session::new(channel.id, label, rule), now).await {
            Ok(handler) => {
                let ctx = self.manager.context();
                spawn_refresh_loop(
                    Arc::clone(&handler),
                    Arc::clone(&ctx.clock),
                    ctx.config.refresh_interval,
                );
                tracing::info!(channel_id = %channel.id, %scope, "tracking new call");
                Ok(Some(handler))
            }
            Err(ManagerError::AlreadyExists(_)) => {
                let handler = self.manager.settled(channel.id).await;
                if handler.is_none() {
                    tracing::warn!(channel_id = %channel.id, "concurrent call creation failed; join dropped");
                }
                Ok(handler)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn leave(
        &self,
        channel: ChannelId,
        member: &MemberProfile,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let Some(handler) = self.manager.resolve(channel) else {
            return Ok(());
        };
        handler.member_leave(member.id, now).await?;
        let _ = handler.refresh(now).await;
        Ok(())
    }

    async fn update(
        &self,
        channel: ChannelId,
        change: &VoiceStateChange,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let Some(handler) = self.manager.resolve(channel) else {
            return Ok(());
        };
        let id = change.member.id;
        handler.member_update(id, now, change.after.status()).await?;
        match (change.before.self_stream, change.after.self_stream) {
            (false, true) => handler.member_start_streaming(id, now).await?,
            (true, false) => handler.member_stop_streaming(id, now).await?,
            _ => {}
        }
        let _ = handler.refresh(now).await;
        Ok(())
    }
}

async fn enter(
    handler: &SessionHandler,
    member: &MemberProfile,
    state: &VoiceState,
    now: DateTime<Utc>,
) -> Result<(), HandlerError> {
    handler.member_join(member, now, state.status()).await?;
    if state.self_stream {
        handler.member_start_streaming(member.id, now).await?;
    }
    let _ = handler.refresh(now).await;
    Ok(())
}
