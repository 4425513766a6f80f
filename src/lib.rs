/*!
Memory-bounded caches for byte-string keys and values.

`bytecached` provides three composable stores:

* [`SizedByteCache`] — a single-threaded LRU store bounded by the total
  byte length of its keys and values, evicting from the least recently
  used end in batches.
* [`TimedByteCache`] — a [`SizedByteCache`] whose entries additionally
  carry an expiry deadline and disappear once it passes.
* [`ShardedByteCache`] — a fixed set of independently locked stores
  fronted by a key hash, safe to share across threads.

All stores copy key and value bytes on insertion; callers are free to
reuse or mutate their own buffers afterwards.

```rust
use bytecached::{ByteCached, SizedByteCache};

let mut cache = SizedByteCache::with_capacity(64, 4);
cache.cache_set(b"alpha", b"one");
assert_eq!(cache.cache_get(b"alpha"), Some(&b"one"[..]));
assert!(cache.cache_remove(b"alpha"));
```

Concurrent callers go through the sharded front-end, which routes each
key to one of its shards by a pure 32-bit hash ([`fnv1a_32`] unless
another is supplied) and copies values out under the shard lock:

```rust
use bytecached::ShardedByteCache;

let cache = ShardedByteCache::new(16, 10 * 1024 * 1024, 512);
cache.set(b"alpha", b"one");
assert_eq!(cache.get(b"alpha").as_deref(), Some(&b"one"[..]));
```
*/

mod hash;
mod stores;

pub use crate::hash::{fnv1a_32, KeyHasher};
pub use crate::stores::{ShardedByteCache, SizedByteCache, TimedByteCache};

/// Cache operations over byte-string keys and values.
///
/// Stores own their bytes: `cache_set` copies both slices, and the slice
/// returned by `cache_get` borrows from the store, staying valid until
/// the next call that takes `&mut self`.
pub trait ByteCached {
    /// Attempt to retrieve a cached value, marking it most recently used.
    fn cache_get(&mut self, key: &[u8]) -> Option<&[u8]>;

    /// Insert or replace a value, marking it most recently used.
    fn cache_set(&mut self, key: &[u8], value: &[u8]);

    /// Remove a cached value, returning whether an entry was removed.
    fn cache_remove(&mut self, key: &[u8]) -> bool;

    /// Remove all cached values.
    fn cache_clear(&mut self);

    /// Return the number of stored entries.
    fn cache_size(&self) -> usize;

    /// Return the summed byte length of stored keys and values.
    fn cache_bytes(&self) -> usize;

    /// Return the configured byte capacity.
    fn cache_capacity_bytes(&self) -> usize;
}
