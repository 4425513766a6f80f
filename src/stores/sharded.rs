use std::time::Duration;

use parking_lot::Mutex;

use super::{SizedByteCache, TimedByteCache};
use crate::hash::{fnv1a_32, KeyHasher};
use crate::ByteCached;

/// Sharded byte cache
///
/// Splits the keyspace across independently locked stores so parallel
/// callers contend per shard instead of on a single lock. Every retrieval
/// relinks the recency list, so shards sit behind plain mutexes rather
/// than reader/writer locks.
///
/// The routing hash runs outside any shard lock; it must be pure and must
/// not call back into the cache, or a key written through one shard
/// becomes unreachable through another.
pub struct ShardedByteCache<C = SizedByteCache> {
    shards: Box<[Mutex<C>]>,
    hasher: KeyHasher,
}

impl ShardedByteCache<SizedByteCache> {
    /// Creates a sharded cache of `num_shards` [`SizedByteCache`] shards
    /// routed by [`fnv1a_32`]. Each shard is budgeted
    /// `total_capacity_bytes / num_shards`; the division's remainder is
    /// dropped.
    pub fn new(num_shards: usize, total_capacity_bytes: usize, evict_batch: usize) -> Self {
        Self::with_hasher(num_shards, total_capacity_bytes, evict_batch, fnv1a_32)
    }

    /// As [`new`](Self::new), routing with a caller-supplied hash.
    pub fn with_hasher(
        num_shards: usize,
        total_capacity_bytes: usize,
        evict_batch: usize,
        hasher: KeyHasher,
    ) -> Self {
        let capacity = shard_capacity(num_shards, total_capacity_bytes);
        let shards = (0..num_shards)
            .map(|_| SizedByteCache::with_capacity(capacity, evict_batch))
            .collect();
        Self::from_shards(shards, hasher)
    }
}

impl ShardedByteCache<TimedByteCache> {
    /// Creates a sharded cache of [`TimedByteCache`] shards routed by
    /// [`fnv1a_32`], splitting `total_capacity_bytes` the same way as
    /// [`ShardedByteCache::new`].
    pub fn with_capacity_and_lifespan(
        num_shards: usize,
        total_capacity_bytes: usize,
        evict_batch: usize,
        default_ttl: Duration,
    ) -> Self {
        let capacity = shard_capacity(num_shards, total_capacity_bytes);
        let shards = (0..num_shards)
            .map(|_| TimedByteCache::with_capacity_and_lifespan(capacity, evict_batch, default_ttl))
            .collect();
        Self::from_shards(shards, fnv1a_32)
    }

    /// Insert or replace a value on its shard with an explicit lifespan.
    pub fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) {
        self.shard(key).lock().set_with_ttl(key, value, ttl);
    }
}

impl<C: ByteCached> ShardedByteCache<C> {
    /// Assembles a sharded cache from pre-built shards, for callers that
    /// need non-uniform budgets or a store variant without a dedicated
    /// constructor.
    pub fn from_shards(shards: Vec<C>, hasher: KeyHasher) -> Self {
        if shards.is_empty() {
            panic!("`num_shards` of `ShardedByteCache` must be greater than zero.")
        }
        ShardedByteCache {
            shards: shards.into_iter().map(Mutex::new).collect(),
            hasher,
        }
    }

    /// The shard index `key` routes to.
    pub fn shard_index(&self, key: &[u8]) -> usize {
        (self.hasher)(key) as usize % self.shards.len()
    }

    fn shard(&self, key: &[u8]) -> &Mutex<C> {
        &self.shards[self.shard_index(key)]
    }

    /// Retrieve a copy of the cached value, marking it most recently used
    /// on its shard. The copy is taken under the shard lock, so the
    /// caller never borrows across it.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.shard(key)
            .lock()
            .cache_get(key)
            .map(|value| value.to_vec())
    }

    /// Insert or replace a value on its shard.
    pub fn set(&self, key: &[u8], value: &[u8]) {
        self.shard(key).lock().cache_set(key, value);
    }

    /// Remove a value from its shard, returning whether an entry was
    /// removed.
    pub fn remove(&self, key: &[u8]) -> bool {
        self.shard(key).lock().cache_remove(key)
    }

    /// Remove all entries from every shard.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.lock().cache_clear();
        }
    }

    /// Total live entries across shards. Shards are summed one lock at a
    /// time, so the figure is approximate while writers are active.
    pub fn size(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().cache_size()).sum()
    }

    /// Total live bytes across shards, with the same caveat as
    /// [`size`](Self::size).
    pub fn bytes(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().cache_bytes())
            .sum()
    }

    /// Number of shards.
    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Per-shard entry counts, in shard order.
    pub fn shard_sizes(&self) -> Vec<usize> {
        self.shards
            .iter()
            .map(|shard| shard.lock().cache_size())
            .collect()
    }

    /// Per-shard byte totals, in shard order.
    pub fn shard_bytes(&self) -> Vec<usize> {
        self.shards
            .iter()
            .map(|shard| shard.lock().cache_bytes())
            .collect()
    }
}

fn shard_capacity(num_shards: usize, total_capacity_bytes: usize) -> usize {
    if num_shards == 0 {
        panic!("`num_shards` of `ShardedByteCache` must be greater than zero.")
    }
    let capacity = total_capacity_bytes / num_shards;
    if capacity == 0 {
        panic!("`total_capacity_bytes` of `ShardedByteCache` must cover at least one byte per shard.")
    }
    capacity
}

#[cfg(test)]
/// Cache store tests
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn routes_keys_by_hash_modulo_shards() {
        let c = ShardedByteCache::new(16, 16 * 1024, 1);
        c.set(b"x", b"1");

        let expected = fnv1a_32(b"x") as usize % 16;
        assert_eq!(c.shard_index(b"x"), expected);
        for (index, size) in c.shard_sizes().into_iter().enumerate() {
            if index == expected {
                assert_eq!(size, 1);
            } else {
                assert_eq!(size, 0);
            }
        }
        assert_eq!(c.get(b"x").as_deref(), Some(&b"1"[..]));
    }

    #[test]
    fn same_key_always_routes_to_one_shard() {
        let c = ShardedByteCache::new(7, 7 * 1024, 1);
        let index = c.shard_index(b"stable");
        for _ in 0..10 {
            c.set(b"stable", b"v");
            assert_eq!(c.shard_index(b"stable"), index);
        }
        assert_eq!(c.size(), 1);
    }

    #[test]
    fn custom_hasher_controls_routing() {
        fn pin_to_three(_key: &[u8]) -> u32 {
            3
        }
        let c = ShardedByteCache::with_hasher(8, 8 * 1024, 1, pin_to_three);
        c.set(b"a", b"1");
        c.set(b"b", b"2");
        assert_eq!(c.shard_sizes()[3], 2);
        assert_eq!(c.size(), 2);
    }

    #[test]
    fn per_shard_budgets_bound_memory() {
        fn pin_to_zero(_key: &[u8]) -> u32 {
            0
        }
        // 64 total bytes over 4 shards leaves 16 per shard; 4-byte
        // entries cap the pinned shard at four of them.
        let c = ShardedByteCache::with_hasher(4, 64, 1, pin_to_zero);
        for i in 0..32u8 {
            c.set(&[i], &[0, 0, 0]);
        }
        assert!(c.bytes() <= 16);
        assert_eq!(c.shard_sizes()[0], 4);
    }

    #[test]
    fn remove_reports_whether_an_entry_existed() {
        let c = ShardedByteCache::new(4, 4 * 1024, 1);
        c.set(b"a", b"1");
        assert!(c.remove(b"a"));
        assert!(!c.remove(b"a"));
        assert!(c.get(b"a").is_none());
    }

    #[test]
    fn clear_empties_every_shard() {
        let c = ShardedByteCache::new(4, 4 * 1024, 1);
        for i in 0..32u8 {
            c.set(&[i], &[i]);
        }
        c.clear();
        assert_eq!(c.size(), 0);
        assert_eq!(c.bytes(), 0);
    }

    #[test]
    #[should_panic]
    fn zero_shards_panics() {
        ShardedByteCache::new(0, 1024, 1);
    }

    #[test]
    #[should_panic]
    fn starved_shards_panic() {
        ShardedByteCache::new(16, 8, 1);
    }

    #[test]
    fn timed_shards_expire_entries() {
        let c = ShardedByteCache::with_capacity_and_lifespan(
            4,
            4 * 1024,
            1,
            Duration::from_millis(30),
        );
        c.set(b"a", b"1");
        c.set_with_ttl(b"b", b"2", Duration::from_secs(60));
        assert_eq!(c.get(b"a").as_deref(), Some(&b"1"[..]));

        thread::sleep(Duration::from_millis(40));
        assert!(c.get(b"a").is_none());
        assert_eq!(c.get(b"b").as_deref(), Some(&b"2"[..]));
    }

    #[test]
    fn parallel_mixed_workload_stays_within_budget() {
        const TOTAL_BYTES: usize = 10 * 1024 * 1024;
        const SHARDS: usize = 16;

        let cache = Arc::new(ShardedByteCache::new(SHARDS, TOTAL_BYTES, 512));
        let mut handles = Vec::new();
        for worker in 0..8u32 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                let value = vec![worker as u8; 1024];
                for i in 0..50_000u32 {
                    let pick = (i.wrapping_mul(2_654_435_761).wrapping_add(worker)) % 1000;
                    let key = [pick as u8, (pick >> 8) as u8];
                    match i % 4 {
                        0 | 1 => cache.set(&key, &value),
                        2 => {
                            if let Some(found) = cache.get(&key) {
                                assert_eq!(found.len(), 1024);
                            }
                        }
                        _ => {
                            cache.remove(&key);
                        }
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.bytes() <= TOTAL_BYTES);
        for bytes in cache.shard_bytes() {
            assert!(bytes <= TOTAL_BYTES / SHARDS);
        }
        // 2-byte keys over 1 KB values: byte totals must line up with
        // entry counts exactly.
        for (size, bytes) in cache.shard_sizes().into_iter().zip(cache.shard_bytes()) {
            assert_eq!(bytes, size * 1026);
        }
    }
}
