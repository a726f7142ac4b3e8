//! Channel → live handler registry.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use rr_core::{ChannelId, Session};
use thiserror::Error;
use tokio::sync::Notify;

use crate::handler::{CallContext, FinalizeHandle, HandlerError, SessionHandler};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("a session for channel {0} already exists")]
    AlreadyExists(ChannelId),
    #[error("failed to create session: {0}")]
    Create(#[source] HandlerError),
}

enum Slot {
    /// Reserved while the initial status is being published.
    Pending,
    Live(Arc<SessionHandler>),
}

/// Slot map shared between the manager and the handlers it created.
#[derive(Default)]
pub struct Registry {
    slots: RwLock<HashMap<ChannelId, Slot>>,
    /// Signalled whenever a pending slot is installed or released.
    settled: Notify,
}

impl Registry {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ChannelId, Slot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ChannelId, Slot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, channel: ChannelId) -> Option<Arc<SessionHandler>> {
        match self.read().get(&channel) {
            Some(Slot::Live(handler)) if !handler.is_closed() => Some(Arc::clone(handler)),
            _ => None,
        }
    }

    /// Like `resolve`, but waits out a creation in progress for `channel`.
    async fn settle(&self, channel: ChannelId) -> Option<Arc<SessionHandler>> {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.read().get(&channel) {
                Some(Slot::Pending) => {}
                Some(Slot::Live(handler)) if !handler.is_closed() => return Some(Arc::clone(handler)),
                _ => return None,
            }
            notified.await;
        }
    }

    fn reserve(&self, channel: ChannelId) -> Result<(), ManagerError> {
        match self.write().entry(channel) {
            Entry::Occupied(mut entry) => match entry.get() {
                Slot::Live(handler) if handler.is_closed() => {
                    entry.insert(Slot::Pending);
                    Ok(())
                }
                _ => Err(ManagerError::AlreadyExists(channel)),
            },
            Entry::Vacant(entry) => {
                entry.insert(Slot::Pending);
                Ok(())
            }
        }
    }

    fn install(&self, channel: ChannelId, handler: &Arc<SessionHandler>) {
        match self.write().entry(channel) {
            Entry::Occupied(mut entry) if matches!(entry.get(), Slot::Pending) => {
                entry.insert(Slot::Live(Arc::clone(handler)));
            }
            _ => {
                tracing::debug!(channel_id = %channel, "reservation dropped while creating session");
            }
        }
        self.settled.notify_waiters();
    }

    fn rollback(&self, channel: ChannelId) {
        let mut slots = self.write();
        if matches!(slots.get(&channel), Some(Slot::Pending)) {
            slots.remove(&channel);
        }
        drop(slots);
        self.settled.notify_waiters();
    }

    fn remove(&self, channel: ChannelId) -> bool {
        let removed = self.write().remove(&channel).is_some();
        self.settled.notify_waiters();
        removed
    }

    /// Removes `channel` only while it still maps to `handler`.
    pub(crate) fn remove_if_same(&self, channel: ChannelId, handler: &SessionHandler) -> bool {
        let mut slots = self.write();
        let same = matches!(
            slots.get(&channel),
            Some(Slot::Live(live)) if std::ptr::eq(Arc::as_ptr(live), handler)
        );
        if same {
            slots.remove(&channel);
        }
        same
    }

    fn live(&self) -> Vec<Arc<SessionHandler>> {
        self.read()
            .values()
            .filter_map(|slot| match slot {
                Slot::Live(handler) if !handler.is_closed() => Some(Arc::clone(handler)),
                _ => None,
            })
            .collect()
    }
}

/// Owns every live [`SessionHandler`], at most one per channel.
pub struct SessionManager {
    registry: Arc<Registry>,
    ctx: Arc<CallContext>,
}

impl SessionManager {
    pub fn new(ctx: Arc<CallContext>) -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            ctx,
        }
    }

    pub const fn context(&self) -> &Arc<CallContext> {
        &self.ctx
    }

    /// The open handler for `channel`, if any.
    pub fn resolve(&self, channel: ChannelId) -> Option<Arc<SessionHandler>> {
        self.registry.resolve(channel)
    }

    /// The open handler for `channel`, waiting for a concurrent `add` to
    /// finish first. `None` if that creation failed or nothing is registered.
    pub async fn settled(&self, channel: ChannelId) -> Option<Arc<SessionHandler>> {
        self.registry.settle(channel).await
    }

    /// Creates and registers a handler for `session`.
    ///
    /// The channel is reserved for the duration of the initial publish, so a
    /// concurrent `add` for the same channel fails with `AlreadyExists`. A
    /// closed handler still finalizing does not block a new one.
    pub async fn add(
        &self,
        session: Session,
        now: DateTime<Utc>,
    ) -> Result<Arc<SessionHandler>, ManagerError> {
        let channel = session.channel_id();
        self.registry.reserve(channel)?;

        let created = SessionHandler::create(
            session,
            now,
            Arc::clone(&self.ctx),
            Arc::downgrade(&self.registry),
        )
        .await;
        match created {
            Ok(handler) => {
                self.registry.install(channel, &handler);
                Ok(handler)
            }
            Err(err) => {
                self.registry.rollback(channel);
                tracing::warn!(channel_id = %channel, error = %err, "session creation failed");
                Err(ManagerError::Create(err))
            }
        }
    }

    /// Forgets whatever is registered for `channel`. Returns whether anything was.
    pub fn remove(&self, channel: ChannelId) -> bool {
        self.registry.remove(channel)
    }

    pub fn handlers(&self) -> Vec<Arc<SessionHandler>> {
        self.registry.live()
    }

    pub fn len(&self) -> usize {
        self.registry.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes every open handler, e.g. on shutdown.
    pub async fn close_all(&self, now: DateTime<Utc>) -> Vec<FinalizeHandle> {
        let mut pending = Vec::new();
        for handler in self.registry.live() {
            pending.push(handler.close(now).await);
        }
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, context, member, ts};
    use rr_core::{Rule, VoiceStatus};

    fn session(channel: u64) -> Session {
        Session::new(
            ChannelId::new(channel).unwrap(),
            "lounge",
            Rule::enabled_for(ChannelId::new(900).unwrap()),
        )
    }

    fn manager(sink: &Arc<RecordingSink>) -> SessionManager {
        SessionManager::new(context(sink))
    }

    #[tokio::test(start_paused = true)]
    async fn add_then_resolve() {
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(&sink);
        let channel = ChannelId::new(1).unwrap();
        assert!(manager.resolve(channel).is_none());

        let handler = manager.add(session(1), ts(0)).await.unwrap();
        let resolved = manager.resolve(channel).unwrap();
        assert!(Arc::ptr_eq(&handler, &resolved));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_add_for_live_channel_fails() {
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(&sink);
        manager.add(session(1), ts(0)).await.unwrap();

        let err = manager.add(session(1), ts(1)).await.unwrap_err();
        assert!(matches!(err, ManagerError::AlreadyExists(_)));
        assert_eq!(sink.published().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_adds_create_one_handler() {
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(&sink);
        let (first, second) = tokio::join!(
            manager.add(session(1), ts(0)),
            manager.add(session(1), ts(0))
        );
        assert!(first.is_ok() != second.is_ok());
        assert_eq!(sink.published().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_creation_registers_nothing() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail_publishes();
        let manager = manager(&sink);
        let err = manager.add(session(1), ts(0)).await.unwrap_err();
        assert!(matches!(err, ManagerError::Create(HandlerError::PublishFailed(_))));
        assert!(manager.is_empty());
        assert!(!manager.remove(ChannelId::new(1).unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn closing_deregisters_and_allows_recreation() {
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(&sink);
        let channel = ChannelId::new(1).unwrap();
        let old = manager.add(session(1), ts(0)).await.unwrap();

        let finalize = old.close(ts(5)).await;
        assert!(manager.resolve(channel).is_none());

        let new = manager.add(session(1), ts(6)).await.unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        finalize.wait().await.unwrap();
        assert!(Arc::ptr_eq(&manager.resolve(channel).unwrap(), &new));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_handler_does_not_remove_its_replacement() {
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(&sink);
        let channel = ChannelId::new(1).unwrap();
        let old = manager.add(session(1), ts(0)).await.unwrap();
        assert!(manager.remove(channel));
        let new = manager.add(session(1), ts(1)).await.unwrap();

        old.close(ts(2)).await.wait().await.unwrap();
        assert!(Arc::ptr_eq(&manager.resolve(channel).unwrap(), &new));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_is_idempotent() {
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(&sink);
        let channel = ChannelId::new(1).unwrap();
        manager.add(session(1), ts(0)).await.unwrap();
        assert!(manager.remove(channel));
        assert!(!manager.remove(channel));
        assert!(manager.resolve(channel).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn close_all_finalizes_every_session() {
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(&sink);
        for channel in 1..=3 {
            let handler = manager.add(session(channel), ts(0)).await.unwrap();
            handler
                .member_join(&member(channel, "alice"), ts(0), VoiceStatus::ACTIVE)
                .await
                .unwrap();
        }
        for finalize in manager.close_all(ts(60)).await {
            finalize.wait().await.unwrap();
        }
        assert!(manager.is_empty());
        assert_eq!(sink.updates().len(), 3);
    }
}
