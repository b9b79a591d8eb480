//! Keyed mutual exclusion
//!
//! Handlers serialize per entity: one resolver per system and one evaluation
//! per release target at a time. The lock is held for as long as the returned
//! guard lives.

use crate::error::StoreResult;
use async_trait::async_trait;
use dashmap::DashMap;
use rudder_types::{ReleaseTargetId, SystemId};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock key for release-target resolution of a system
pub fn system_lock_key(system_id: &SystemId) -> String {
    format!("system:{}", system_id)
}

/// Lock key for evaluation of a release target
pub fn release_target_lock_key(release_target_id: &ReleaseTargetId) -> String {
    format!("release-target:{}", release_target_id)
}

/// Held lock; released on drop
pub struct LockGuard {
    key: String,
    _held: Box<dyn Send + Sync>,
}

impl LockGuard {
    pub fn new(key: impl Into<String>, held: impl Send + Sync + 'static) -> Self {
        Self {
            key: key.into(),
            _held: Box::new(held),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

/// Mutex keyed by string, possibly shared across processes
#[async_trait]
pub trait DistributedMutex: Send + Sync {
    /// Wait until `key` is free and take it
    async fn acquire(&self, key: &str) -> StoreResult<LockGuard>;

    /// Take `key` if it is free right now
    async fn try_acquire(&self, key: &str) -> StoreResult<Option<LockGuard>>;
}

type Slots = DashMap<String, Arc<Mutex<()>>>;

/// Process-local keyed mutex
///
/// A key's slot lives only while someone holds or waits for it.
#[derive(Debug, Default)]
pub struct InMemoryMutex {
    locks: Arc<Slots>,
}

impl InMemoryMutex {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn held(&self, key: &str, guard: OwnedMutexGuard<()>) -> LockGuard {
        LockGuard::new(
            key,
            HeldSlot {
                key: key.to_string(),
                guard: Some(guard),
                locks: self.locks.clone(),
            },
        )
    }
}

struct HeldSlot {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Slots>,
}

impl Drop for HeldSlot {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left: nobody holds or waits
        self.locks
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

#[async_trait]
impl DistributedMutex for InMemoryMutex {
    async fn acquire(&self, key: &str) -> StoreResult<LockGuard> {
        let guard = self.slot(key).lock_owned().await;
        Ok(self.held(key, guard))
    }

    async fn try_acquire(&self, key: &str) -> StoreResult<Option<LockGuard>> {
        Ok(self
            .slot(key)
            .try_lock_owned()
            .ok()
            .map(|guard| self.held(key, guard)))
    }
}
