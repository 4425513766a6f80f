use std::time::{Duration, Instant};

use super::sized::CacheEntry;
use super::SizedByteCache;
use crate::ByteCached;

/// Timed LRU byte cache
///
/// A [`SizedByteCache`] whose entries carry an absolute expiry deadline.
/// The deadline is set at insertion time and refreshed when the entry is
/// replaced, not when it is retrieved. Expired entries are dropped by the
/// access that finds them; nothing scans in the background, so an expired
/// entry that is never probed keeps its bytes until LRU eviction reaches
/// it.
///
/// Note: This cache is in-memory only
#[derive(Clone, Debug)]
pub struct TimedByteCache {
    pub(super) store: SizedByteCache,
    default_ttl: Duration,
}

impl TimedByteCache {
    /// Creates a new `TimedByteCache` with a byte capacity, an eviction
    /// batch size, and the lifespan stamped on inserts that don't carry
    /// an explicit ttl.
    pub fn with_capacity_and_lifespan(
        capacity_bytes: usize,
        evict_batch: usize,
        default_ttl: Duration,
    ) -> TimedByteCache {
        TimedByteCache {
            store: SizedByteCache::with_capacity(capacity_bytes, evict_batch),
            default_ttl,
        }
    }

    /// Insert or replace a value with an explicit lifespan.
    ///
    /// A zero `ttl` stores an entry that is already past its deadline: it
    /// occupies bytes until probed, but no retrieval will return it.
    pub fn set_with_ttl(&mut self, key: &[u8], value: &[u8], ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.store.set_with_expiry(key, value, Some(expires_at));
    }

    /// The lifespan applied when no explicit ttl is given.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn iter_unexpired(&self, now: Instant) -> impl Iterator<Item = &CacheEntry> {
        self.store
            .iter_entries()
            .filter(move |entry| !entry.is_expired(now))
    }

    /// Return an iterator of keys in the current order from most to least
    /// recently used. Entries past their deadline are excluded.
    pub fn key_order(&self) -> impl Iterator<Item = &[u8]> {
        self.iter_unexpired(Instant::now())
            .map(|entry| entry.key.as_ref())
    }

    /// Return an iterator of values in the current order from most to
    /// least recently used. Entries past their deadline are excluded.
    pub fn value_order(&self) -> impl Iterator<Item = &[u8]> {
        self.iter_unexpired(Instant::now())
            .map(|entry| entry.value.as_ref())
    }
}

impl ByteCached for TimedByteCache {
    fn cache_get(&mut self, key: &[u8]) -> Option<&[u8]> {
        self.store.get_unexpired(key, Instant::now())
    }

    fn cache_set(&mut self, key: &[u8], value: &[u8]) {
        let ttl = self.default_ttl;
        self.set_with_ttl(key, value, ttl);
    }

    fn cache_remove(&mut self, key: &[u8]) -> bool {
        self.store.cache_remove(key)
    }

    fn cache_clear(&mut self) {
        self.store.cache_clear();
    }

    /// Counts every stored entry, expired-but-unprobed ones included.
    fn cache_size(&self) -> usize {
        self.store.cache_size()
    }

    /// Counts every stored entry's bytes, expired-but-unprobed ones
    /// included.
    fn cache_bytes(&self) -> usize {
        self.store.cache_bytes()
    }

    fn cache_capacity_bytes(&self) -> usize {
        self.store.cache_capacity_bytes()
    }
}

#[cfg(test)]
/// Cache store tests
mod tests {
    use std::thread::sleep;

    use super::*;

    #[test]
    fn entries_expire_after_their_ttl() {
        let mut c = TimedByteCache::with_capacity_and_lifespan(1024, 1, Duration::from_secs(60));
        c.set_with_ttl(b"key1", b"value1", Duration::from_millis(50));
        assert_eq!(c.cache_get(b"key1"), Some(&b"value1"[..]));

        sleep(Duration::from_millis(60));
        assert!(c.cache_get(b"key1").is_none());
    }

    #[test]
    fn expiry_probe_releases_bytes() {
        let mut c = TimedByteCache::with_capacity_and_lifespan(1024, 1, Duration::from_secs(60));
        c.set_with_ttl(b"a", b"1", Duration::from_millis(20));
        assert_eq!(c.cache_bytes(), 2);

        sleep(Duration::from_millis(30));
        // Still accounted for until an access probes it.
        assert_eq!(c.cache_bytes(), 2);
        assert!(c.cache_get(b"a").is_none());
        assert_eq!(c.cache_bytes(), 0);
        assert_eq!(c.cache_size(), 0);
    }

    #[test]
    fn zero_ttl_is_never_returned() {
        let mut c = TimedByteCache::with_capacity_and_lifespan(1024, 1, Duration::from_secs(60));
        c.set_with_ttl(b"a", b"1", Duration::from_millis(0));
        assert!(c.cache_get(b"a").is_none());
    }

    #[test]
    fn default_lifespan_applies_to_plain_sets() {
        let mut c = TimedByteCache::with_capacity_and_lifespan(1024, 1, Duration::from_millis(40));
        c.cache_set(b"a", b"1");
        assert_eq!(c.cache_get(b"a"), Some(&b"1"[..]));

        sleep(Duration::from_millis(50));
        assert!(c.cache_get(b"a").is_none());
    }

    #[test]
    fn replacing_an_entry_restamps_its_deadline() {
        let mut c = TimedByteCache::with_capacity_and_lifespan(1024, 1, Duration::from_secs(60));
        c.set_with_ttl(b"a", b"1", Duration::from_millis(50));
        sleep(Duration::from_millis(30));

        c.set_with_ttl(b"a", b"2", Duration::from_millis(100));
        sleep(Duration::from_millis(30));
        assert_eq!(c.cache_get(b"a"), Some(&b"2"[..]));
    }

    #[test]
    fn capacity_eviction_still_applies() {
        let mut c = TimedByteCache::with_capacity_and_lifespan(4, 1, Duration::from_secs(60));
        c.cache_set(b"a", b"1");
        c.cache_set(b"b", b"2");
        c.cache_set(b"c", b"3");

        assert!(c.cache_get(b"a").is_none());
        assert_eq!(c.cache_get(b"b"), Some(&b"2"[..]));
        assert_eq!(c.cache_get(b"c"), Some(&b"3"[..]));
    }

    #[test]
    fn key_order_skips_expired_entries() {
        let mut c = TimedByteCache::with_capacity_and_lifespan(1024, 1, Duration::from_secs(60));
        c.set_with_ttl(b"a", b"1", Duration::from_millis(20));
        c.set_with_ttl(b"b", b"2", Duration::from_secs(60));

        sleep(Duration::from_millis(30));
        assert_eq!(c.key_order().collect::<Vec<_>>(), [&b"b"[..]]);
        // The expired entry still counts until something probes it.
        assert_eq!(c.cache_size(), 2);
    }

    #[test]
    fn remove_ignores_deadlines() {
        let mut c = TimedByteCache::with_capacity_and_lifespan(1024, 1, Duration::from_secs(60));
        c.set_with_ttl(b"a", b"1", Duration::from_secs(60));
        assert!(c.cache_remove(b"a"));
        assert!(!c.cache_remove(b"a"));
    }
}
