//! Suspended-run storage.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::AdapterError;
use crate::state::Restaurant;

/// What a suspended run leaves behind for its resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingFeedback {
    pub thread_id: String,
    pub location: String,
    pub query: String,
    pub recommendations: String,
    pub restaurants: Vec<Restaurant>,
    pub feedback_options: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingFeedback {
    /// Whether the entry is at least `ttl` old.
    #[must_use]
    pub fn is_expired(&self, ttl: Duration) -> bool {
        // A timestamp in the future (clock skew) never expires.
        (Utc::now() - self.created_at)
            .to_std()
            .is_ok_and(|age| age >= ttl)
    }
}

/// Whether [`SessionRegistry::register`] may replace an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overwrite {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("thread `{0}` already has a suspended run")]
    DuplicateThread(String),
    #[error("no suspended run for thread `{0}`")]
    NotFound(String),
}

impl From<RegistryError> for AdapterError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::DuplicateThread(t) => Self::DuplicateThread(t),
            RegistryError::NotFound(t) => Self::UnknownThread(t),
        }
    }
}

/// Process-wide table of suspended runs, keyed by thread id.
///
/// Cheap to clone; clones share the table.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, PendingFeedback>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, PendingFeedback>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, PendingFeedback>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `data` under `thread_id`.
    pub fn register(
        &self,
        thread_id: &str,
        data: PendingFeedback,
        overwrite: Overwrite,
    ) -> Result<(), RegistryError> {
        let mut guard = self.write();
        if overwrite == Overwrite::Deny && guard.contains_key(thread_id) {
            return Err(RegistryError::DuplicateThread(thread_id.to_string()));
        }
        guard.insert(thread_id.to_string(), data);
        drop(guard);
        debug!(name: "registry.registered", %thread_id, "Suspended run registered");
        Ok(())
    }

    /// Remove and return the entry. Succeeds at most once per registration.
    pub fn take(&self, thread_id: &str) -> Result<PendingFeedback, RegistryError> {
        self.write()
            .remove(thread_id)
            .ok_or_else(|| RegistryError::NotFound(thread_id.to_string()))
    }

    /// Drop a stale entry, if any. Returns whether one existed.
    pub fn discard(&self, thread_id: &str) -> bool {
        let removed = self.write().remove(thread_id).is_some();
        if removed {
            debug!(name: "registry.discarded", %thread_id, "Stale suspended run dropped");
        }
        removed
    }

    /// Remove entries at least `ttl` old. Returns how many were removed.
    pub fn expire(&self, ttl: Duration) -> usize {
        let mut guard = self.write();
        let before = guard.len();
        guard.retain(|_, pending| !pending.is_expired(ttl));
        before - guard.len()
    }

    #[must_use]
    pub fn contains(&self, thread_id: &str) -> bool {
        self.read().contains_key(thread_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Call [`Self::expire`] every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        &self,
        interval: Duration,
        ttl: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = registry.expire(ttl);
                        if removed > 0 {
                            info!(name: "registry.swept", removed, remaining = registry.len(), "Expired suspended runs");
                        }
                    }
                }
            }
            debug!(name: "registry.sweeper.stopped", "Registry sweeper stopped");
        })
    }
}
