//! Cache Store Module
//!
//! In-process map with per-key expiry. Entries written with a TTL get a
//! tokio eviction timer, so `size()` tracks live entries without reads;
//! expiry is also checked on every read, which covers callers running
//! outside a runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::cache::{CacheEntry, CacheStats};

/// Pending eviction for one entry generation.
#[derive(Debug)]
struct EvictionTimer {
    id: u64,
    handle: AbortHandle,
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    timers: HashMap<String, EvictionTimer>,
    stats: CacheStats,
    next_id: u64,
}

impl<V> Inner<V> {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn cancel_timer(&mut self, key: &str) {
        if let Some(timer) = self.timers.remove(key) {
            timer.handle.abort();
        }
    }

    /// Removes `key` only if it still holds generation `id`.
    fn evict_if_current(&mut self, key: &str, id: u64) {
        if self.timers.get(key).map_or(false, |t| t.id == id) {
            self.timers.remove(key);
        }
        if self.entries.get(key).map_or(false, |e| e.id == id) {
            self.entries.remove(key);
            self.stats.record_expiration();
            trace!("Evicted {} on timer", key);
        }
    }

    /// Drops `key` if it has expired; returns true when it did.
    fn purge_if_expired(&mut self, key: &str, now: Instant) -> bool {
        if self.entries.get(key).map_or(false, |e| e.is_expired_at(now)) {
            self.entries.remove(key);
            self.cancel_timer(key);
            self.stats.record_expiration();
            true
        } else {
            false
        }
    }
}

impl<V> Drop for Inner<V> {
    fn drop(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }
}

// == Memory Cache ==
/// Thread-safe in-process cache with optional per-entry TTL.
///
/// Clones share the same underlying map.
pub struct MemoryCache<V> {
    inner: Arc<Mutex<Inner<V>>>,
}

impl<V> Clone for MemoryCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for MemoryCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("MemoryCache")
            .field("entries", &inner.entries.len())
            .field("timers", &inner.timers.len())
            .finish()
    }
}

impl<V: Clone + Send + 'static> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<V>(inner: &Mutex<Inner<V>>) -> MutexGuard<'_, Inner<V>> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<V: Clone + Send + 'static> MemoryCache<V> {
    // == Constructor ==
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                timers: HashMap::new(),
                stats: CacheStats::new(),
                next_id: 0,
            })),
        }
    }

    // == Try Get ==
    /// Returns a clone of the value for `key`, or None on a miss.
    ///
    /// When `ttl` is given and the entry has no expiry yet, it expires `ttl`
    /// from now. An existing expiry is never moved.
    ///
    /// # Arguments
    /// * `key` - The key to look up
    /// * `ttl` - Expiry to attach to a never-expiring entry on hit
    pub fn try_get(&self, key: &str, ttl: Option<Duration>) -> Option<V> {
        let mut guard = lock(&self.inner);
        let inner = &mut *guard;
        if inner.purge_if_expired(key, Instant::now()) {
            inner.stats.record_miss();
            debug!("Cache miss (expired): {}", key);
            return None;
        }

        let Some(entry) = inner.entries.get_mut(key) else {
            inner.stats.record_miss();
            return None;
        };
        let value = entry.value.clone();
        let upgraded = match ttl {
            Some(ttl) if !ttl.is_zero() && entry.attach_ttl(ttl) => {
                entry.expires_at.map(|deadline| (entry.id, deadline))
            }
            _ => None,
        };

        inner.stats.record_hit();
        if let Some((id, deadline)) = upgraded {
            self.schedule(inner, key, id, deadline);
        }
        Some(value)
    }

    // == Get ==
    /// Returns a clone of the value for `key` without touching its expiry.
    pub fn get(&self, key: &str) -> Option<V> {
        self.try_get(key, None)
    }

    // == Put ==
    /// Stores `value` with no expiry, cancelling any pending eviction.
    pub fn put(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let mut inner = lock(&self.inner);
        inner.cancel_timer(&key);
        let id = inner.next_id();
        inner.entries.insert(key, CacheEntry::new(value, None, id));
    }

    // == Put With TTL ==
    /// Stores `value` and schedules its eviction `ttl` from now.
    ///
    /// A zero `ttl` behaves like [`MemoryCache::put`].
    pub fn put_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        if ttl.is_zero() {
            self.put(key, value);
            return;
        }
        let key = key.into();
        let mut inner = lock(&self.inner);
        inner.cancel_timer(&key);
        let id = inner.next_id();
        let entry = CacheEntry::new(value, Some(ttl), id);
        let deadline = entry.expires_at;
        inner.entries.insert(key.clone(), entry);
        if let Some(deadline) = deadline {
            self.schedule(&mut inner, &key, id, deadline);
        }
    }

    // == Delete ==
    /// Removes `key`. Returns true if a live entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = lock(&self.inner);
        inner.cancel_timer(key);
        match inner.entries.remove(key) {
            Some(entry) => !entry.is_expired(),
            None => false,
        }
    }

    // == Has ==
    /// Returns true if `key` holds a live entry. Does not count as a hit.
    pub fn has(&self, key: &str) -> bool {
        let mut inner = lock(&self.inner);
        if inner.purge_if_expired(key, Instant::now()) {
            return false;
        }
        inner.entries.contains_key(key)
    }

    /// Remaining time to live for `key`, or None when absent or never expiring.
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        lock(&self.inner)
            .entries
            .get(key)
            .and_then(|entry| entry.ttl_remaining())
    }

    // == Size ==
    /// Number of live entries.
    pub fn size(&self) -> usize {
        let inner = lock(&self.inner);
        let now = Instant::now();
        inner
            .entries
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .count()
    }

    // == Clear ==
    /// Cancels every pending eviction, then drops every entry.
    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        for (_, timer) in inner.timers.drain() {
            timer.handle.abort();
        }
        inner.entries.clear();
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = lock(&self.inner).stats.clone();
        stats.set_total_entries(self.size());
        stats
    }

    /// Spawns the eviction timer for generation `id` of `key`.
    ///
    /// Outside a tokio runtime nothing is spawned and reads enforce expiry.
    fn schedule(&self, inner: &mut Inner<V>, key: &str, id: u64, deadline: Instant) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak: Weak<Mutex<Inner<V>>> = Arc::downgrade(&self.inner);
        let task_key = key.to_string();
        let task = runtime.spawn(async move {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
            if let Some(inner) = weak.upgrade() {
                lock(&inner).evict_if_current(&task_key, id);
            }
        });
        let timer = EvictionTimer {
            id,
            handle: task.abort_handle(),
        };
        if let Some(previous) = inner.timers.insert(key.to_string(), timer) {
            previous.handle.abort();
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_cache_new() {
        let cache: MemoryCache<String> = MemoryCache::new();
        assert_eq!(cache.size(), 0);
        assert!(!cache.has("missing"));
    }

    #[test]
    fn test_put_and_get() {
        let cache = MemoryCache::new();
        cache.put("key1", "value1".to_string());

        assert_eq!(cache.get("key1"), Some("value1".to_string()));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_get_nonexistent_counts_miss() {
        let cache: MemoryCache<i32> = MemoryCache::new();
        assert_eq!(cache.get("nope"), None);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn test_delete() {
        let cache = MemoryCache::new();
        cache.put("key1", 1);

        assert!(cache.delete("key1"));
        assert!(!cache.delete("key1"));
        assert_eq!(cache.get("key1"), None);
    }

    #[test]
    fn test_put_overwrites() {
        let cache = MemoryCache::new();
        cache.put("key1", 1);
        cache.put("key1", 2);

        assert_eq!(cache.get("key1"), Some(2));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_lazy_expiry_without_runtime() {
        let cache = MemoryCache::new();
        cache.put_with_ttl("short", 1, Duration::from_millis(30));
        assert!(cache.has("short"));

        sleep(Duration::from_millis(60));

        assert_eq!(cache.size(), 0);
        assert_eq!(cache.get("short"), None);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_zero_ttl_behaves_like_put() {
        let cache = MemoryCache::new();
        cache.put_with_ttl("key", 1, Duration::ZERO);

        sleep(Duration::from_millis(10));

        assert_eq!(cache.get("key"), Some(1));
    }

    #[test]
    fn test_try_get_upgrades_missing_expiry() {
        let cache = MemoryCache::new();
        cache.put("key", 1);

        assert_eq!(cache.try_get("key", Some(Duration::from_millis(30))), Some(1));
        sleep(Duration::from_millis(60));

        assert_eq!(cache.get("key"), None);
    }

    #[test]
    fn test_try_get_never_extends_expiry() {
        let cache = MemoryCache::new();
        cache.put_with_ttl("key", 1, Duration::from_millis(30));

        assert_eq!(cache.try_get("key", Some(Duration::from_secs(3600))), Some(1));
        sleep(Duration::from_millis(60));

        assert_eq!(cache.get("key"), None);
    }

    #[test]
    fn test_put_clears_previous_expiry() {
        let cache = MemoryCache::new();
        cache.put_with_ttl("key", 1, Duration::from_millis(30));
        cache.put("key", 2);

        sleep(Duration::from_millis(60));

        assert_eq!(cache.get("key"), Some(2));
    }

    #[test]
    fn test_clones_share_entries() {
        let cache = MemoryCache::new();
        let other = cache.clone();
        cache.put("shared", 5);

        assert_eq!(other.get("shared"), Some(5));
    }

    #[tokio::test]
    async fn test_timer_evicts_without_reads() {
        let cache = MemoryCache::new();
        cache.put_with_ttl("key", 1, Duration::from_millis(50));
        assert_eq!(cache.size(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;

        // The timer removed the entry itself, so it is counted as an expiration
        // without any read having happened.
        assert_eq!(cache.stats().expirations, 1);
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test]
    async fn test_timer_spares_replaced_entry() {
        let cache = MemoryCache::new();
        cache.put_with_ttl("key", 1, Duration::from_millis(50));
        cache.put_with_ttl("key", 2, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.get("key"), Some(2));
        assert_eq!(cache.stats().expirations, 0);
    }

    #[tokio::test]
    async fn test_clear_cancels_timers() {
        let cache = MemoryCache::new();
        cache.put_with_ttl("a", 1, Duration::from_millis(50));
        cache.put_with_ttl("b", 2, Duration::from_millis(50));
        cache.clear();
        cache.put("a", 3);

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.get("a"), Some(3));
        assert_eq!(cache.stats().expirations, 0);
    }
}
