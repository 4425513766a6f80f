use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::time::Instant;

use hashbrown::HashTable;

#[cfg(feature = "ahash")]
use ahash::RandomState;
#[cfg(not(feature = "ahash"))]
use std::collections::hash_map::RandomState;

use crate::ByteCached;

/// A single cached record. The cache owns both byte buffers.
#[derive(Clone, Debug)]
pub(super) struct CacheEntry {
    pub(super) key: Box<[u8]>,
    pub(super) value: Box<[u8]>,
    pub(super) expires_at: Option<Instant>,
}

impl CacheEntry {
    /// Bytes this entry counts against the capacity.
    fn cost(&self) -> usize {
        self.key.len() + self.value.len()
    }

    pub(super) fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

/// Recency-ordered entry arena.
///
/// Entries live in a dense `Vec` of slots linked from most recently used
/// (head) to least recently used (tail) by slot index, so relinks never
/// touch a pointer; vacated slots are recycled through a free stack. The
/// arena owns the byte accounting: `bytes` tracks the summed key + value
/// length of live entries through every insert, value swap, and removal.
#[derive(Clone, Debug)]
struct EntryArena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    bytes: usize,
}

#[derive(Clone, Debug)]
struct Slot {
    entry: Option<CacheEntry>,
    /// Neighbor toward the head (more recent).
    prev: Option<usize>,
    /// Neighbor toward the tail (less recent).
    next: Option<usize>,
}

impl EntryArena {
    fn new() -> EntryArena {
        EntryArena {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            bytes: 0,
        }
    }

    fn get(&self, index: usize) -> &CacheEntry {
        self.slots[index].entry.as_ref().expect("slot is vacant")
    }

    fn bytes(&self) -> usize {
        self.bytes
    }

    /// Least recently used slot, if any entry is live.
    fn tail(&self) -> Option<usize> {
        self.tail
    }

    /// Unlink `index` from the recency chain, patching head/tail when the
    /// slot sat at either end.
    fn detach(&mut self, index: usize) {
        let prev = self.slots[index].prev;
        let next = self.slots[index].next;
        match prev {
            Some(prev) => self.slots[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.slots[next].prev = prev,
            None => self.tail = prev,
        }
        self.slots[index].prev = None;
        self.slots[index].next = None;
    }

    fn attach_head(&mut self, index: usize) {
        let old_head = self.head;
        self.slots[index].prev = None;
        self.slots[index].next = old_head;
        match old_head {
            Some(old_head) => self.slots[old_head].prev = Some(index),
            None => self.tail = Some(index),
        }
        self.head = Some(index);
    }

    /// Mark `index` most recently used. Skips the relink when the slot is
    /// already the head.
    fn promote(&mut self, index: usize) {
        if self.head == Some(index) {
            return;
        }
        self.detach(index);
        self.attach_head(index);
    }

    /// Store a new entry at the head, reusing a vacated slot when one is
    /// available.
    fn insert_head(&mut self, entry: CacheEntry) -> usize {
        self.bytes += entry.cost();
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    entry: Some(entry),
                    prev: None,
                    next: None,
                });
                self.slots.len() - 1
            }
        };
        self.attach_head(index);
        index
    }

    /// Swap in a new value and deadline, applying the byte delta.
    fn replace_value(&mut self, index: usize, value: &[u8], expires_at: Option<Instant>) {
        let entry = self.slots[index].entry.as_mut().expect("slot is vacant");
        self.bytes -= entry.value.len();
        entry.value = Box::from(value);
        entry.expires_at = expires_at;
        self.bytes += entry.value.len();
    }

    /// Take the entry out of `index`, unlink it, and put the slot up for
    /// reuse.
    fn remove(&mut self, index: usize) -> CacheEntry {
        self.detach(index);
        let entry = self.slots[index].entry.take().expect("slot is vacant");
        self.free.push(index);
        self.bytes -= entry.cost();
        entry
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.bytes = 0;
    }

    fn iter(&self) -> EntryIter<'_> {
        EntryIter {
            arena: self,
            cursor: self.head,
        }
    }
}

#[derive(Debug)]
struct EntryIter<'a> {
    arena: &'a EntryArena,
    cursor: Option<usize>,
}

impl<'a> Iterator for EntryIter<'a> {
    type Item = &'a CacheEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let slot = &self.arena.slots[index];
        self.cursor = slot.next;
        slot.entry.as_ref()
    }
}

/// Least Recently Used cache bounded by total key + value bytes
///
/// Stores byte-string keys and values until their summed length crosses
/// the configured capacity, then evicts the least recently used entries
/// `evict_batch` at a time until the total fits again.
///
/// Note: This cache is in-memory only and not safe for concurrent use;
/// wrap it in a [`ShardedByteCache`](crate::ShardedByteCache) to share it
/// across threads.
#[derive(Clone)]
pub struct SizedByteCache {
    store: HashTable<usize>,
    hash_builder: RandomState,
    entries: EntryArena,
    capacity_bytes: usize,
    evict_batch: usize,
}

impl fmt::Debug for SizedByteCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizedByteCache")
            .field("entries", &self.entries)
            .field("capacity_bytes", &self.capacity_bytes)
            .field("evict_batch", &self.evict_batch)
            .finish()
    }
}

impl SizedByteCache {
    /// Creates a new `SizedByteCache` holding at most `capacity_bytes` of
    /// key + value data and evicting `evict_batch` entries per
    /// over-capacity pass.
    pub fn with_capacity(capacity_bytes: usize, evict_batch: usize) -> SizedByteCache {
        if capacity_bytes == 0 {
            panic!("`capacity_bytes` of `SizedByteCache` must be greater than zero.")
        }
        if evict_batch == 0 {
            panic!("`evict_batch` of `SizedByteCache` must be greater than zero.")
        }
        SizedByteCache {
            store: HashTable::new(),
            hash_builder: RandomState::new(),
            entries: EntryArena::new(),
            capacity_bytes,
            evict_batch,
        }
    }

    /// Return an iterator of key/value pairs in the current order from
    /// most to least recently used.
    pub fn iter_order(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries
            .iter()
            .map(|entry| (entry.key.as_ref(), entry.value.as_ref()))
    }

    /// Return an iterator of keys in the current order from most to least
    /// recently used.
    pub fn key_order(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().map(|entry| entry.key.as_ref())
    }

    /// Return an iterator of values in the current order from most to
    /// least recently used.
    pub fn value_order(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().map(|entry| entry.value.as_ref())
    }

    pub(super) fn iter_entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.iter()
    }

    fn hash(&self, key: &[u8]) -> u64 {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn find_index(&self, hash: u64, key: &[u8]) -> Option<usize> {
        let Self { store, entries, .. } = self;
        store
            .find(hash, |&index| entries.get(index).key.as_ref() == key)
            .copied()
    }

    fn insert_index(&mut self, hash: u64, index: usize) {
        let Self {
            ref mut store,
            ref entries,
            ref hash_builder,
            ..
        } = *self;
        store.insert_unique(hash, index, |&i| {
            let mut hasher = hash_builder.build_hasher();
            entries.get(i).key.hash(&mut hasher);
            hasher.finish()
        });
    }

    fn remove_index(&mut self, hash: u64, key: &[u8]) -> Option<usize> {
        let Self {
            ref mut store,
            ref entries,
            ..
        } = *self;
        match store.find_entry(hash, |&index| entries.get(index).key.as_ref() == key) {
            Ok(occupied) => Some(occupied.remove().0),
            Err(_) => None,
        }
    }

    /// Drop the entry in `index`, unlinking it from both the recency
    /// order and the hash index.
    fn evict_index(&mut self, index: usize) {
        let hash = self.hash(self.entries.get(index).key.as_ref());
        let Self { ref mut store, .. } = *self;
        let erased = store
            .find_entry(hash, |&candidate| candidate == index)
            .map(|occupied| occupied.remove())
            .is_ok();
        assert!(erased, "SizedByteCache failed evicting a cache key");
        self.entries.remove(index);
    }

    /// Remove tail entries in whole batches until the byte total fits the
    /// capacity again. The slot touched by the current insert is never
    /// evicted here, so a single entry larger than the whole capacity
    /// survives its own insert and is dropped by the next one that finds
    /// the cache over capacity.
    fn evict_to_capacity(&mut self, newest: usize) {
        while self.entries.bytes() > self.capacity_bytes {
            for _ in 0..self.evict_batch {
                let oldest = match self.entries.tail() {
                    Some(oldest) if oldest != newest => oldest,
                    _ => return,
                };
                self.evict_index(oldest);
            }
        }
    }

    pub(super) fn set_with_expiry(
        &mut self,
        key: &[u8],
        value: &[u8],
        expires_at: Option<Instant>,
    ) {
        let hash = self.hash(key);
        let index = match self.find_index(hash, key) {
            Some(index) => {
                self.entries.replace_value(index, value, expires_at);
                self.entries.promote(index);
                index
            }
            None => {
                let entry = CacheEntry {
                    key: Box::from(key),
                    value: Box::from(value),
                    expires_at,
                };
                let index = self.entries.insert_head(entry);
                self.insert_index(hash, index);
                index
            }
        };
        self.evict_to_capacity(index);
    }

    /// Look up `key`, dropping the entry when its deadline has passed.
    pub(super) fn get_unexpired(&mut self, key: &[u8], now: Instant) -> Option<&[u8]> {
        let hash = self.hash(key);
        let index = self.find_index(hash, key)?;
        if self.entries.get(index).is_expired(now) {
            self.evict_index(index);
            return None;
        }
        self.entries.promote(index);
        Some(self.entries.get(index).value.as_ref())
    }
}

impl ByteCached for SizedByteCache {
    fn cache_get(&mut self, key: &[u8]) -> Option<&[u8]> {
        let hash = self.hash(key);
        let index = self.find_index(hash, key)?;
        self.entries.promote(index);
        Some(self.entries.get(index).value.as_ref())
    }

    fn cache_set(&mut self, key: &[u8], value: &[u8]) {
        self.set_with_expiry(key, value, None);
    }

    fn cache_remove(&mut self, key: &[u8]) -> bool {
        let hash = self.hash(key);
        match self.remove_index(hash, key) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    fn cache_clear(&mut self) {
        self.store.clear();
        self.entries.clear();
    }

    fn cache_size(&self) -> usize {
        self.store.len()
    }

    fn cache_bytes(&self) -> usize {
        self.entries.bytes()
    }

    fn cache_capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }
}
