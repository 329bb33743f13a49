//! Single-Flight Lock Manager
//!
//! One async mutex per cache key, created lazily under a short-held table
//! guard. Holding a key's guard means no other caller is computing that key.
//! The table is reset wholesale once it reaches its size cap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;

/// Default lock table size that triggers a reset
pub const DEFAULT_MAX_LOCKS: usize = 10_000;

// == Key Guard ==
/// Exclusive hold on one key. Released on drop, including when the owning
/// future is cancelled.
#[derive(Debug)]
pub struct KeyGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

// == Lock Manager ==
/// Per-key lock table shared by every caller of one cache.
#[derive(Debug)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    max_locks: usize,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOCKS)
    }
}

impl LockManager {
    /// Creates an empty table that resets when a new key would exceed `max_locks`.
    pub fn new(max_locks: usize) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            max_locks: max_locks.max(1),
        }
    }

    /// Returns the lock for `key`, creating it if absent.
    ///
    /// Inserting a new key into a full table clears the table first. Callers
    /// already holding or awaiting an old lock keep it; new callers get a
    /// fresh one, so dedup is lost for keys in flight across a reset.
    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = locks.get(key) {
            return Arc::clone(existing);
        }
        if locks.len() >= self.max_locks {
            warn!(
                "Lock table reached {} entries, resetting",
                locks.len()
            );
            locks.clear();
        }
        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(key.to_string(), Arc::clone(&lock));
        lock
    }

    /// Waits for exclusive access to `key`.
    pub async fn acquire(&self, key: &str) -> KeyGuard {
        let lock = self.lock_for(key);
        KeyGuard {
            key: key.to_string(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of keys currently in the table.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
