//! Per-channel call state machine.
//!
//! A [`SessionHandler`] owns one [`Session`] and serializes every mutation
//! behind an async mutex. Network I/O never happens while that mutex is held:
//! refreshes work from a snapshot, and closing hands an owned snapshot to a
//! detached finalization task.
//!
//! ```text
//! Open --last member leaves--> PendingClose --grace elapses--> Closed
//!   ^                              |
//!   +---------member joins---------+
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use rr_core::{ChannelId, MemberProfile, Session, SessionError, UserId, VoiceStatus};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::task::{JoinError, JoinHandle};

use crate::avatar::AvatarCache;
use crate::clock::Clock;
use crate::config::HandlerConfig;
use crate::manager::Registry;
use crate::sink::{MessageHandle, NotificationSink, SinkError};
use crate::status::{Phase, TimelineError, status_message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Open,
    /// Empty and waiting out the grace period.
    PendingClose,
    Closed,
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("session for channel {0} is closed")]
    Closed(ChannelId),
    #[error("no notification channel configured for channel {0}")]
    NoTarget(ChannelId),
    #[error("failed to publish status: {0}")]
    PublishFailed(#[source] SinkError),
    #[error("failed to render status: {0}")]
    RenderFailed(#[from] TimelineError),
    #[error("finalization task failed: {0}")]
    Finalize(#[from] JoinError),
}

/// Collaborators shared by every handler.
pub struct CallContext {
    pub sink: Arc<dyn NotificationSink>,
    pub avatars: Option<Arc<AvatarCache>>,
    pub clock: Arc<dyn Clock>,
    pub config: HandlerConfig,
}

impl CallContext {
    pub fn new(sink: Arc<dyn NotificationSink>, clock: Arc<dyn Clock>, config: HandlerConfig) -> Self {
        Self {
            sink,
            avatars: None,
            clock,
            config,
        }
    }

    #[must_use]
    pub fn with_avatars(mut self, avatars: Arc<AvatarCache>) -> Self {
        self.avatars = Some(avatars);
        self
    }
}

/// Completion of the detached "ended" publish started by [`SessionHandler::close`].
///
/// Awaiting is optional; dropping the handle leaves the task running.
#[derive(Debug)]
pub struct FinalizeHandle(Option<JoinHandle<Result<(), HandlerError>>>);

impl FinalizeHandle {
    /// True when `close` found the handler already closed.
    pub const fn is_noop(&self) -> bool {
        self.0.is_none()
    }

    pub async fn wait(self) -> Result<(), HandlerError> {
        match self.0 {
            Some(task) => task.await?,
            None => Ok(()),
        }
    }
}

struct GraceTimer {
    generation: u64,
    /// When the session became empty; used as the end time if the timer fires.
    emptied_at: DateTime<Utc>,
    task: JoinHandle<()>,
}

struct Inner {
    session: Session,
    state: HandlerState,
    refresh_deadline: Option<DateTime<Utc>>,
    grace: Option<GraceTimer>,
    generation: u64,
}

pub struct SessionHandler {
    channel_id: ChannelId,
    message: MessageHandle,
    inner: Mutex<Inner>,
    state: watch::Sender<HandlerState>,
    /// Orders refresh publishes against the final publish.
    publish_gate: Arc<Mutex<()>>,
    ctx: Arc<CallContext>,
    registry: Weak<Registry>,
    this: Weak<Self>,
}

impl fmt::Debug for SessionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandler")
            .field("channel_id", &self.channel_id)
            .field("message", &self.message)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionHandler {
    /// Starts `session` and publishes its initial status.
    ///
    /// Nothing is created if the publish fails.
    pub async fn create(
        mut session: Session,
        now: DateTime<Utc>,
        ctx: Arc<CallContext>,
        registry: Weak<Registry>,
    ) -> Result<Arc<Self>, HandlerError> {
        let channel_id = session.channel_id();
        let target = session
            .rule()
            .notification_channel
            .ok_or(HandlerError::NoTarget(channel_id))?;
        session.start(now)?;

        let message = status_message(
            &session,
            now,
            Phase::Ongoing,
            &ctx.config,
            ctx.avatars.as_deref(),
        )
        .await?;
        let handle = ctx
            .sink
            .publish(target, message)
            .await
            .map_err(HandlerError::PublishFailed)?;
        tracing::info!(channel_id = %channel_id, target = %target, "call started");

        let (state, _) = watch::channel(HandlerState::Open);
        Ok(Arc::new_cyclic(|this| Self {
            channel_id,
            message: handle,
            inner: Mutex::new(Inner {
                session,
                state: HandlerState::Open,
                refresh_deadline: None,
                grace: None,
                generation: 0,
            }),
            state,
            publish_gate: Arc::new(Mutex::new(())),
            ctx,
            registry,
            this: this.clone(),
        }))
    }

    pub const fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub const fn message(&self) -> &MessageHandle {
        &self.message
    }

    pub fn state(&self) -> HandlerState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == HandlerState::Closed
    }

    /// Watches state transitions.
    pub fn subscribe(&self) -> watch::Receiver<HandlerState> {
        self.state.subscribe()
    }

    /// A copy of the session as it is now.
    pub async fn snapshot(&self) -> Session {
        self.inner.lock().await.session.clone()
    }

    /// Registers `member` on first sight and marks them present.
    ///
    /// A join while the close grace period is running cancels it.
    pub async fn member_join(
        &self,
        member: &MemberProfile,
        now: DateTime<Utc>,
        status: VoiceStatus,
    ) -> Result<(), HandlerError> {
        let mut inner = self.lock_open().await?;
        if !inner.session.is_registered(member.id) {
            let name = inner.session.rule().user_format.format(member);
            inner.session.register_participant(member.id, name)?;
        }
        inner.session.member_join(member.id, now, status)?;

        if inner.state == HandlerState::PendingClose {
            if let Some(timer) = inner.grace.take() {
                timer.task.abort();
            }
            self.set_state(&mut inner, HandlerState::Open);
            tracing::info!(
                channel_id = %self.channel_id,
                participant = %member.id,
                "rejoin cancelled pending close"
            );
        }
        Ok(())
    }

    pub async fn member_update(
        &self,
        id: UserId,
        now: DateTime<Utc>,
        status: VoiceStatus,
    ) -> Result<(), HandlerError> {
        let mut inner = self.lock_open().await?;
        inner.session.member_update(id, now, status)?;
        Ok(())
    }

    /// Marks `id` absent, ending any stream they had open.
    ///
    /// Returns whether the call is now empty; an empty call starts the close
    /// grace period.
    pub async fn member_leave(&self, id: UserId, now: DateTime<Utc>) -> Result<bool, HandlerError> {
        let mut inner = self.lock_open().await?;
        let empty = inner.session.member_leave(id, now)?;
        if empty && inner.state == HandlerState::Open {
            self.set_state(&mut inner, HandlerState::PendingClose);
            self.arm_grace(&mut inner, now);
        }
        Ok(empty)
    }

    pub async fn member_start_streaming(
        &self,
        id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), HandlerError> {
        let mut inner = self.lock_open().await?;
        inner.session.member_start_streaming(id, now)?;
        Ok(())
    }

    pub async fn member_stop_streaming(
        &self,
        id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), HandlerError> {
        let mut inner = self.lock_open().await?;
        inner.session.member_stop_streaming(id, now)?;
        Ok(())
    }

    /// Republishes the ongoing status unless closed or inside the cooldown.
    ///
    /// Returns whether anything was published. Failures leave the state
    /// untouched.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<bool, HandlerError> {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            if inner.state == HandlerState::Closed {
                return Ok(false);
            }
            if inner.refresh_deadline.is_some_and(|deadline| now < deadline) {
                tracing::trace!(channel_id = %self.channel_id, "refresh throttled");
                return Ok(false);
            }
            inner.session.clone()
        };

        let result = self.publish_ongoing(&snapshot, now).await;
        match &result {
            Ok(true) => {
                let cooldown = chrono::Duration::from_std(self.ctx.config.refresh_cooldown)
                    .unwrap_or(chrono::Duration::MAX);
                let deadline = now
                    .checked_add_signed(cooldown)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                let mut inner = self.inner.lock().await;
                inner.refresh_deadline = inner.refresh_deadline.max(Some(deadline));
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(channel_id = %self.channel_id, error = %err, "refresh failed");
            }
        }
        result
    }

    async fn publish_ongoing(&self, snapshot: &Session, now: DateTime<Utc>) -> Result<bool, HandlerError> {
        let message = status_message(
            snapshot,
            now,
            Phase::Ongoing,
            &self.ctx.config,
            self.ctx.avatars.as_deref(),
        )
        .await?;

        let _gate = self.publish_gate.lock().await;
        if self.is_closed() {
            return Ok(false);
        }
        self.ctx
            .sink
            .update(&self.message, message)
            .await
            .map_err(HandlerError::PublishFailed)?;
        tracing::debug!(channel_id = %self.channel_id, "status refreshed");
        Ok(true)
    }

    /// Ends the session and starts publishing its final status.
    ///
    /// Idempotent: closing a closed handler returns a no-op handle.
    pub async fn close(&self, now: DateTime<Utc>) -> FinalizeHandle {
        let mut inner = self.inner.lock().await;
        if inner.state == HandlerState::Closed {
            return FinalizeHandle(None);
        }
        if let Some(timer) = inner.grace.take() {
            timer.task.abort();
        }
        self.close_locked(&mut inner, now)
    }

    async fn lock_open(&self) -> Result<MutexGuard<'_, Inner>, HandlerError> {
        let inner = self.inner.lock().await;
        if inner.state == HandlerState::Closed {
            return Err(HandlerError::Closed(self.channel_id));
        }
        Ok(inner)
    }

    fn set_state(&self, inner: &mut Inner, next: HandlerState) {
        inner.state = next;
        self.state.send_replace(next);
    }

    fn arm_grace(&self, inner: &mut Inner, emptied_at: DateTime<Utc>) {
        if let Some(stale) = inner.grace.take() {
            stale.task.abort();
        }
        let Some(handler) = self.this.upgrade() else {
            return;
        };
        inner.generation += 1;
        let generation = inner.generation;
        let grace = self.ctx.config.close_grace;
        let task = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            handler.grace_elapsed(generation).await;
        });
        inner.grace = Some(GraceTimer {
            generation,
            emptied_at,
            task,
        });
        tracing::debug!(
            channel_id = %self.channel_id,
            grace_secs = grace.as_secs(),
            "call empty, close pending"
        );
    }

    /// Runs inside the grace timer task.
    async fn grace_elapsed(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        let armed = inner
            .grace
            .as_ref()
            .is_some_and(|timer| timer.generation == generation);
        if !armed || inner.state != HandlerState::PendingClose {
            return;
        }
        let Some(timer) = inner.grace.take() else {
            return;
        };
        // Dropping, not aborting: this is the timer's own task.
        let emptied_at = timer.emptied_at;
        drop(timer);
        tracing::info!(channel_id = %self.channel_id, "grace period elapsed");
        let _detached = self.close_locked(&mut inner, emptied_at);
    }

    fn close_locked(&self, inner: &mut Inner, now: DateTime<Utc>) -> FinalizeHandle {
        if let Err(err) = inner.session.end(now) {
            tracing::warn!(channel_id = %self.channel_id, error = %err, "session end not recorded");
        }
        self.set_state(inner, HandlerState::Closed);

        if let Some(registry) = self.registry.upgrade() {
            registry.remove_if_same(self.channel_id, self);
        }

        let snapshot = inner.session.clone();
        tracing::info!(
            channel_id = %self.channel_id,
            participants = snapshot.participants().len(),
            "call closed"
        );
        let task = tokio::spawn(finalize(
            Arc::clone(&self.ctx),
            snapshot,
            self.message.clone(),
            Arc::clone(&self.publish_gate),
            now,
        ));
        FinalizeHandle(Some(task))
    }
}

/// Publishes the ended status with bounded retry.
async fn finalize(
    ctx: Arc<CallContext>,
    session: Session,
    message: MessageHandle,
    gate: Arc<Mutex<()>>,
    now: DateTime<Utc>,
) -> Result<(), HandlerError> {
    let policy = ctx.config.close_retry;
    let attempts = policy.attempts.max(1);
    let channel_id = session.channel_id();
    let mut attempt = 1;
    loop {
        match publish_ended(&ctx, &session, &message, &gate, now).await {
            Ok(()) => {
                tracing::info!(channel_id = %channel_id, attempt, "final status published");
                return Ok(());
            }
            Err(err) if attempt < attempts => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    channel_id = %channel_id,
                    attempt,
                    error = %err,
                    retry_in_secs = delay.as_secs(),
                    "final status update failed"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::error!(
                    channel_id = %channel_id,
                    attempt,
                    error = %err,
                    "giving up on final status update"
                );
                return Err(err);
            }
        }
    }
}

async fn publish_ended(
    ctx: &CallContext,
    session: &Session,
    message: &MessageHandle,
    gate: &Mutex<()>,
    now: DateTime<Utc>,
) -> Result<(), HandlerError> {
    let status = status_message(
        session,
        now,
        Phase::Ended,
        &ctx.config,
        ctx.avatars.as_deref(),
    )
    .await?;
    let _gate = gate.lock().await;
    ctx.sink
        .update(message, status)
        .await
        .map_err(HandlerError::PublishFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, context, member, settle, ts};
    use rr_core::{HistoryDetail, Rule};
    use std::time::Duration;

    const GRACE: Duration = Duration::from_secs(60);

    fn session() -> Session {
        let rule = Rule {
            history: HistoryDetail::NameWithDuration,
            ..Rule::enabled_for(ChannelId::new(900).unwrap())
        };
        Session::new(ChannelId::new(100).unwrap(), "lounge", rule)
    }

    async fn open(sink: &Arc<RecordingSink>) -> Arc<SessionHandler> {
        SessionHandler::create(session(), ts(0), context(sink), Weak::new())
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn create_publishes_initial_status() {
        let sink = Arc::new(RecordingSink::default());
        let handler = open(&sink).await;

        let published = sink.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, ChannelId::new(900).unwrap());
        assert_eq!(published[0].1.report.title, "Call in progress");
        assert_eq!(handler.state(), HandlerState::Open);
        assert_eq!(handler.snapshot().await.start_time(), Some(ts(0)));
    }

    #[tokio::test(start_paused = true)]
    async fn create_fails_when_publish_fails() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail_publishes();
        let err = SessionHandler::create(session(), ts(0), context(&sink), Weak::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, HandlerError::PublishFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn create_requires_a_target() {
        let sink = Arc::new(RecordingSink::default());
        let s = Session::new(ChannelId::new(100).unwrap(), "lounge", Rule::default());
        let err = SessionHandler::create(s, ts(0), context(&sink), Weak::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, HandlerError::NoTarget(_)));
        assert!(sink.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn names_follow_the_rule_user_format() {
        let sink = Arc::new(RecordingSink::default());
        let handler = open(&sink).await;
        let alice = member(1, "alice");
        handler.member_join(&alice, ts(0), VoiceStatus::ACTIVE).await.unwrap();
        let snapshot = handler.snapshot().await;
        assert_eq!(snapshot.participant(alice.id).unwrap().display_name(), "Alice");
    }

    #[tokio::test(start_paused = true)]
    async fn rejoin_within_grace_keeps_session_open() {
        let sink = Arc::new(RecordingSink::default());
        let handler = open(&sink).await;
        let alice = member(1, "alice");

        handler.member_join(&alice, ts(0), VoiceStatus::ACTIVE).await.unwrap();
        assert!(handler.member_leave(alice.id, ts(5)).await.unwrap());
        assert_eq!(handler.state(), HandlerState::PendingClose);

        tokio::time::advance(GRACE - Duration::from_secs(1)).await;
        handler.member_join(&alice, ts(6), VoiceStatus::ACTIVE).await.unwrap();
        assert_eq!(handler.state(), HandlerState::Open);

        tokio::time::advance(GRACE * 10).await;
        settle().await;
        assert_eq!(handler.state(), HandlerState::Open);
        assert_eq!(handler.snapshot().await.start_time(), Some(ts(0)));
        assert!(sink.updates().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_session_closes_once_after_grace() {
        let sink = Arc::new(RecordingSink::default());
        let handler = open(&sink).await;
        let alice = member(1, "alice");
        let mut state = handler.subscribe();

        handler.member_join(&alice, ts(0), VoiceStatus::ACTIVE).await.unwrap();
        handler.member_leave(alice.id, ts(30)).await.unwrap();

        state
            .wait_for(|s| *s == HandlerState::Closed)
            .await
            .unwrap();
        settle().await;

        let updates = sink.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.report.title, "Call ended");
        // end time is when the call emptied, not when the timer fired
        assert_eq!(handler.snapshot().await.end_time(), Some(ts(30)));

        assert!(handler.close(ts(90)).await.is_noop());
        settle().await;
        assert_eq!(sink.updates().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_leave_keeps_member_streaming() {
        let sink = Arc::new(RecordingSink::default());
        let handler = open(&sink).await;
        let alice = member(1, "alice");
        handler.member_join(&alice, ts(10), VoiceStatus::ACTIVE).await.unwrap();
        handler.member_start_streaming(alice.id, ts(5)).await.unwrap();

        assert!(matches!(
            handler.member_leave(alice.id, ts(7)).await,
            Err(HandlerError::Session(SessionError::InvalidTransition { .. }))
        ));
        let snapshot = handler.snapshot().await;
        let participant = snapshot.participant(alice.id).unwrap();
        assert!(participant.is_present());
        assert!(participant.is_streaming());
        assert_eq!(handler.state(), HandlerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn mutations_after_close_are_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let handler = open(&sink).await;
        let alice = member(1, "alice");
        handler.member_join(&alice, ts(0), VoiceStatus::ACTIVE).await.unwrap();

        handler.close(ts(10)).await.wait().await.unwrap();
        assert!(handler.is_closed());
        assert!(matches!(
            handler.member_leave(alice.id, ts(11)).await,
            Err(HandlerError::Closed(_))
        ));
        assert!(matches!(
            handler.member_join(&alice, ts(11), VoiceStatus::ACTIVE).await,
            Err(HandlerError::Closed(_))
        ));
        assert!(!handler.refresh(ts(11)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn direct_close_cancels_pending_grace_timer() {
        let sink = Arc::new(RecordingSink::default());
        let handler = open(&sink).await;
        let alice = member(1, "alice");
        handler.member_join(&alice, ts(0), VoiceStatus::ACTIVE).await.unwrap();
        handler.member_leave(alice.id, ts(1)).await.unwrap();

        handler.close(ts(2)).await.wait().await.unwrap();
        tokio::time::advance(GRACE * 2).await;
        settle().await;
        assert_eq!(sink.updates().len(), 1);
        assert_eq!(handler.snapshot().await.end_time(), Some(ts(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_is_throttled_by_cooldown() {
        let sink = Arc::new(RecordingSink::default());
        let handler = open(&sink).await;

        let t0 = ts(1);
        assert!(handler.refresh(t0).await.unwrap());
        assert!(!handler.refresh(t0 + chrono::Duration::seconds(5)).await.unwrap());
        assert_eq!(sink.updates().len(), 1);

        assert!(handler.refresh(t0 + chrono::Duration::seconds(10)).await.unwrap());
        assert_eq!(sink.updates().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_failure_keeps_state() {
        let sink = Arc::new(RecordingSink::default());
        let handler = open(&sink).await;
        sink.fail_next_updates(1);

        assert!(matches!(
            handler.refresh(ts(1)).await,
            Err(HandlerError::PublishFailed(_))
        ));
        assert_eq!(handler.state(), HandlerState::Open);
        // only a delivered refresh starts the cooldown
        assert!(handler.refresh(ts(2)).await.unwrap());
        assert!(!handler.refresh(ts(3)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn finalization_retries_with_backoff() {
        let sink = Arc::new(RecordingSink::default());
        let handler = open(&sink).await;
        sink.fail_next_updates(2);

        let started = tokio::time::Instant::now();
        handler.close(ts(3)).await.wait().await.unwrap();
        assert_eq!(sink.update_attempts(), 3);
        assert_eq!(sink.updates().len(), 1);
        // 10s after the first failure, 20s after the second
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn finalization_gives_up_after_last_attempt() {
        let sink = Arc::new(RecordingSink::default());
        let handler = open(&sink).await;
        sink.fail_next_updates(10);

        let err = handler.close(ts(3)).await.wait().await.unwrap_err();
        assert!(matches!(err, HandlerError::PublishFailed(_)));
        assert_eq!(sink.update_attempts(), 3);
        assert!(handler.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_ends_open_stream() {
        let sink = Arc::new(RecordingSink::default());
        let handler = open(&sink).await;
        let alice = member(1, "alice");
        let bob = member(2, "bob");
        handler.member_join(&alice, ts(0), VoiceStatus::ACTIVE).await.unwrap();
        handler.member_join(&bob, ts(0), VoiceStatus::ACTIVE).await.unwrap();
        handler.member_start_streaming(alice.id, ts(1)).await.unwrap();

        assert!(!handler.member_leave(alice.id, ts(4)).await.unwrap());
        let snapshot = handler.snapshot().await;
        let streams = snapshot.participant(alice.id).unwrap().streaming_intervals();
        assert_eq!(streams[0].end, Some(ts(4)));
        assert_eq!(handler.state(), HandlerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_transitions_surface_as_session_errors() {
        let sink = Arc::new(RecordingSink::default());
        let handler = open(&sink).await;
        let err = handler
            .member_leave(UserId::new(5).unwrap(), ts(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Session(SessionError::UnknownParticipant(_))
        ));
        assert_eq!(handler.state(), HandlerState::Open);
    }
}
