//! Bounded in-memory tier.
//!
//! Holds at most `item_limit` entries and `byte_budget` bytes of payload;
//! when either ceiling is exceeded the least recently used entries go first.

use lru::LruCache;

use super::entry::CacheEntry;
use super::key::CacheKey;

pub(crate) struct MemoryTier<T> {
    entries: LruCache<CacheKey, CacheEntry<T>>,
    bytes: u64,
    item_limit: usize,
    byte_budget: u64,
}

impl<T: Clone> MemoryTier<T> {
    pub fn new(item_limit: usize, byte_budget: u64) -> Self {
        Self {
            entries: LruCache::unbounded(),
            bytes: 0,
            item_limit: item_limit.max(1),
            byte_budget,
        }
    }

    /// Look up an entry, marking it most recently used
    pub fn get_mut(&mut self, key: &CacheKey) -> Option<&mut CacheEntry<T>> {
        self.entries.get_mut(key)
    }

    /// Insert or replace an entry, then enforce both ceilings.
    ///
    /// Returns the keys evicted to make room.
    pub fn insert(&mut self, entry: CacheEntry<T>) -> Vec<CacheKey> {
        let key = entry.metadata.key.clone();
        self.bytes += entry.metadata.size_bytes;
        if let Some(old) = self.entries.put(key, entry) {
            self.bytes = self.bytes.saturating_sub(old.metadata.size_bytes);
        }

        let mut evicted = Vec::new();
        while self.entries.len() > self.item_limit || self.bytes > self.byte_budget {
            match self.entries.pop_lru() {
                Some((key, old)) => {
                    self.bytes = self.bytes.saturating_sub(old.metadata.size_bytes);
                    evicted.push(key);
                }
                None => break,
            }
        }
        evicted
    }

    pub fn remove(&mut self, key: &CacheKey) {
        if let Some(old) = self.entries.pop(key) {
            self.bytes = self.bytes.saturating_sub(old.metadata.size_bytes);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}
