//! Cache Entry Module
//!
//! Defines a single in-process entry with an optional absolute expiry.

use std::time::{Duration, Instant};

// == Cache Entry ==
/// Represents a single cache entry with value and expiry metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Absolute expiry, None = never expires
    pub expires_at: Option<Instant>,
    /// Write generation; eviction timers only act on the entry they were
    /// scheduled for
    pub(crate) id: u64,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new entry that expires `ttl` from now, or never.
    ///
    /// # Arguments
    /// * `value` - The value to store
    /// * `ttl` - Optional time to live
    /// * `id` - Write generation assigned by the owning cache
    pub fn new(value: V, ttl: Option<Duration>, id: u64) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
            id,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// An entry is expired once `now` reaches its expiry instant.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    // == Attach TTL ==
    /// Gives a never-expiring entry an expiry `ttl` from now.
    ///
    /// Returns false, leaving the entry untouched, when it already has one.
    /// Reads may upgrade an entry to a finite expiry but never extend it.
    pub fn attach_ttl(&mut self, ttl: Duration) -> bool {
        if self.expires_at.is_some() {
            return false;
        }
        self.expires_at = Some(Instant::now() + ttl);
        true
    }

    // == Time To Live ==
    /// Returns remaining time to live, or None if no expiry is set.
    ///
    /// # Returns
    /// - `Some(Duration::ZERO)` if the entry has expired
    /// - `Some(remaining)` if the entry has an expiry that hasn't passed
    /// - `None` if the entry never expires
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires| expires.saturating_duration_since(Instant::now()))
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_entry_creation_no_ttl() {
        let entry = CacheEntry::new("test_value", None, 1);

        assert_eq!(entry.value, "test_value");
        assert!(entry.expires_at.is_none());
        assert!(!entry.is_expired());
        assert!(entry.ttl_remaining().is_none());
    }

    #[test]
    fn test_entry_creation_with_ttl() {
        let entry = CacheEntry::new(7, Some(Duration::from_secs(60)), 1);

        assert!(entry.expires_at.is_some());
        assert!(!entry.is_expired());
        let remaining = entry.ttl_remaining().unwrap();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining >= Duration::from_secs(59));
    }

    #[test]
    fn test_entry_expiration() {
        let entry = CacheEntry::new("v", Some(Duration::from_millis(50)), 1);
        assert!(!entry.is_expired());

        sleep(Duration::from_millis(80));

        assert!(entry.is_expired());
        assert_eq!(entry.ttl_remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let now = Instant::now();
        let entry = CacheEntry {
            value: "test",
            expires_at: Some(now),
            id: 1,
        };

        assert!(entry.is_expired_at(now), "Entry should be expired at boundary");
    }

    #[test]
    fn test_attach_ttl_upgrades_once() {
        let mut entry = CacheEntry::new("v", None, 1);

        assert!(entry.attach_ttl(Duration::from_secs(5)));
        let first = entry.expires_at;

        // A second attach must not extend the finite expiry
        assert!(!entry.attach_ttl(Duration::from_secs(500)));
        assert_eq!(entry.expires_at, first);
    }
}
