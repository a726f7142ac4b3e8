//! Avatar lookup with an owned TTL cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rr_core::UserId;
use rr_timeline::{Raster, RenderError};
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum AvatarError {
    #[error("failed to fetch avatar for user {user}: {reason}")]
    Fetch { user: UserId, reason: String },
    #[error("failed to decode avatar: {0}")]
    Decode(#[from] RenderError),
}

/// What to do when an avatar cannot be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AvatarPolicy {
    /// Draw the row without an avatar.
    #[default]
    Optional,
    /// Fail the render.
    Required,
}

#[async_trait]
pub trait AvatarSupplier: Send + Sync {
    async fn fetch(&self, user: UserId) -> Result<Raster, AvatarError>;
}

struct Cached {
    avatar: Raster,
    fetched_at: Instant,
}

/// Caches fetched avatars for `ttl`, holding at most `capacity` entries.
///
/// Failed fetches are not cached.
pub struct AvatarCache {
    supplier: Arc<dyn AvatarSupplier>,
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<UserId, Cached>>,
}

impl AvatarCache {
    pub fn new(supplier: Arc<dyn AvatarSupplier>, ttl: Duration, capacity: usize) -> Self {
        Self {
            supplier,
            ttl,
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, user: UserId) -> Result<Raster, AvatarError> {
        if let Some(avatar) = self.lookup(user) {
            return Ok(avatar);
        }
        let avatar = self.supplier.fetch(user).await?;
        self.insert(user, avatar.clone());
        Ok(avatar)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, Cached>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, user: UserId) -> Option<Raster> {
        let mut entries = self.entries();
        match entries.get(&user) {
            Some(cached) if cached.fetched_at.elapsed() < self.ttl => Some(cached.avatar.clone()),
            Some(_) => {
                entries.remove(&user);
                None
            }
            None => None,
        }
    }

    fn insert(&self, user: UserId, avatar: Raster) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries();
        let ttl = self.ttl;
        entries.retain(|_, cached| cached.fetched_at.elapsed() < ttl);
        while entries.len() >= self.capacity && !entries.contains_key(&user) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, cached)| cached.fetched_at)
                .map(|(&id, _)| id);
            match oldest {
                Some(id) => {
                    tracing::trace!(user = %id, "evicting cached avatar");
                    entries.remove(&id);
                }
                None => break,
            }
        }
        entries.insert(
            user,
            Cached {
                avatar,
                fetched_at: Instant::now(),
            },
        );
    }
}
