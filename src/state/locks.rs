//! Per-channel mutual exclusion.
//!
//! Every state-mutating transition for a channel runs while holding that
//! channel's lock. Locks are created on first use and dropped from the map
//! once nobody holds or waits on them, so a lock is never evicted out from
//! under a holder.

use crate::state::ChannelKey;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<ChannelKey, Arc<Mutex<()>>>;

/// Lazily-populated lock table keyed by channel identity.
#[derive(Debug, Default, Clone)]
pub struct LockManager {
    locks: Arc<LockMap>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Not reentrant: acquiring the same key twice from one task deadlocks.
    pub async fn acquire(&self, key: ChannelKey) -> ChannelLockGuard {
        // The map guard is released at the end of this statement, before awaiting.
        let mutex = self.locks.entry(key).or_default().value().clone();
        let guard = mutex.lock_owned().await;
        ChannelLockGuard {
            key,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of live lock domains.
    pub fn domain_count(&self) -> usize {
        self.locks.len()
    }
}

/// Scoped ownership of one channel's lock.
#[derive(Debug)]
pub struct ChannelLockGuard {
    key: ChannelKey,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl Drop for ChannelLockGuard {
    fn drop(&mut self) {
        // Release first so our own guard no longer counts as a reference.
        drop(self.guard.take());
        // Only the map's reference left means no holder and no waiter.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
