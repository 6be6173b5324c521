//! Two-tier weather cache.
//!
//! Lookups go to a bounded memory tier first and fall back to one JSON file
//! per location on disk. A separate metadata index tracks freshness, size and
//! access recency so staleness checks and disk-quota eviction never read
//! payloads. Disk failures degrade to misses (reads) or memory-only entries
//! (writes); nothing here returns an error to the caller.
//!
//! Lock order: per-key lock, then the index lock, then the memory lock.

mod disk;
mod entry;
mod index;
mod key;
mod memory;

pub use entry::{CacheEntry, EntryMetadata};
pub use key::{CacheKey, COORDINATE_PRECISION};

use chrono::Duration;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stratus_core::{CacheConfig, Clock};
use tokio::sync::OwnedMutexGuard;

use crate::power::PowerMonitor;
use disk::DiskTier;
use entry::StoredPayload;
use index::MetadataIndex;
use memory::MemoryTier;

/// Resolved cache thresholds
#[derive(Debug, Clone)]
pub struct CacheLimits {
    pub staleness: Duration,
    pub max_age: Duration,
    pub disk_budget_bytes: u64,
    pub disk_target_bytes: u64,
    pub memory_items: usize,
    pub memory_budget_bytes: u64,
    pub hot_entries: usize,
}

impl From<&CacheConfig> for CacheLimits {
    fn from(config: &CacheConfig) -> Self {
        Self {
            staleness: config.staleness(),
            max_age: config.max_age(),
            disk_budget_bytes: config.disk_budget_bytes(),
            disk_target_bytes: config.disk_target_bytes(),
            memory_items: config.memory_item_limit,
            memory_budget_bytes: config.memory_budget_bytes(),
            hot_entries: config.hot_entries_on_pressure,
        }
    }
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

/// Cache diagnostics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub memory_bytes: u64,
    pub disk_entries: usize,
    pub disk_bytes: u64,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate in percent
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

/// Serializes operations on the same cache key
#[derive(Default)]
struct KeyLocks {
    locks: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    async fn lock(&self, key: &CacheKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Two-tier cache of the last good payload per rounded coordinate
pub struct CacheStore<T> {
    limits: CacheLimits,
    clock: Arc<dyn Clock>,
    power: Arc<dyn PowerMonitor>,
    disk: DiskTier,
    memory: Mutex<MemoryTier<T>>,
    index: tokio::sync::Mutex<MetadataIndex>,
    key_locks: KeyLocks,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T> CacheStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Open the cache rooted at `root`.
    ///
    /// An unreadable index starts empty; payload files the index does not
    /// know about are deleted and expired entries are pruned.
    pub async fn open(
        root: impl Into<PathBuf>,
        limits: CacheLimits,
        clock: Arc<dyn Clock>,
        power: Arc<dyn PowerMonitor>,
    ) -> Self {
        let root = root.into();
        if let Err(e) = tokio::fs::create_dir_all(&root).await {
            tracing::warn!("Failed to create cache directory {}: {}", root.display(), e);
        }

        let index = MetadataIndex::load(root.join("metadata.json")).await;
        let store = Self {
            memory: Mutex::new(MemoryTier::new(
                limits.memory_items,
                limits.memory_budget_bytes,
            )),
            limits,
            clock,
            power,
            disk: DiskTier::new(&root),
            index: tokio::sync::Mutex::new(index),
            key_locks: KeyLocks::default(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };

        store.reconcile().await;
        store.prune_expired().await;
        store
    }

    /// Look up the entry for a coordinate.
    ///
    /// Memory first, then disk; a disk hit is promoted back into memory.
    /// Every hit refreshes the entry's access recency and count. A payload
    /// file that does not match its index record is discarded as a miss.
    pub async fn get(&self, latitude: f64, longitude: f64) -> Option<CacheEntry<T>> {
        let key = CacheKey::from_coordinates(latitude, longitude);
        let _guard = self.key_locks.lock(&key).await;
        let now = self.clock.now();

        let in_memory = self.memory.lock().get_mut(&key).map(|e| e.clone());
        if let Some(mut entry) = in_memory {
            let mut index = self.index.lock().await;
            match index.touch(&key, now).await {
                Some(meta) => entry.metadata = meta,
                None => entry.metadata.record_access(now),
            }
            if let Some(cached) = self.memory.lock().get_mut(&key) {
                cached.metadata = entry.metadata.clone();
            }

            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Cache hit (memory): {}", key);
            return Some(entry);
        }

        let stored = self.disk.read::<T>(&key).await;
        let mut index = self.index.lock().await;
        let record = index.get(&key).await.cloned();
        let stored = match (stored, record) {
            (Some(stored), Some(meta))
                if meta.persisted && meta.stored_at == stored.stored_at =>
            {
                stored
            }
            (Some(stored), None) => {
                // Evicted while we were reading; serve it without resurrecting it.
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Cache hit on evicted entry: {}", key);
                return Some(CacheEntry {
                    metadata: EntryMetadata::new(key.clone(), stored.stored_at, 0),
                    payload: stored.payload,
                });
            }
            (None, None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Cache miss: {}", key);
                return None;
            }
            (_, Some(_)) => {
                tracing::warn!("No payload matches the index record for {}, dropping it", key);
                self.discard(&mut index, &key).await;
                index.persist().await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let metadata = index.touch(&key, now).await?;
        self.hits.fetch_add(1, Ordering::Relaxed);
        let entry = CacheEntry {
            metadata,
            payload: stored.payload,
        };
        let spilled = self.memory.lock().insert(entry.clone());
        self.forget_unpersisted(&mut index, &spilled);

        tracing::debug!("Cache hit (disk): {}", key);
        Some(entry)
    }

    /// Store a payload for a coordinate in both tiers.
    ///
    /// A disk failure leaves the entry in memory only; a serialization
    /// failure leaves the cache untouched. Both are logged, never returned.
    pub async fn put(&self, latitude: f64, longitude: f64, payload: T) {
        let key = CacheKey::from_coordinates(latitude, longitude);
        let _guard = self.key_locks.lock(&key).await;
        let now = self.clock.now();

        let stored = StoredPayload {
            key: key.clone(),
            stored_at: now,
            payload,
        };
        let bytes = match DiskTier::encode(&stored) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Failed to serialize payload for {}: {}", key, e);
                return;
            }
        };

        let mut meta = EntryMetadata::new(key.clone(), now, bytes.len() as u64);
        let mut index = self.index.lock().await;
        index.ensure_complete().await;

        if let Err(e) = self.disk.write(&key, &bytes).await {
            tracing::warn!("Disk write failed for {}, caching in memory only: {}", key, e);
            meta.persisted = false;
            // The previous payload must not outlive the write that replaced it
            self.disk.remove(&key).await;
        }
        if let Some(previous) = index.get(&key).await {
            meta.access_count = previous.access_count;
        }
        index.upsert(meta.clone());
        let spilled = self.memory.lock().insert(CacheEntry {
            metadata: meta,
            payload: stored.payload,
        });
        if !spilled.is_empty() {
            tracing::debug!("Memory tier full, dropped {} entries", spilled.len());
            self.forget_unpersisted(&mut index, &spilled);
        }

        self.enforce_disk_budget(&mut index, &key).await;
        self.prune_expired_locked(&mut index).await;
        index.persist().await;
        tracing::debug!("Cache stored: {}", key);
    }

    /// True when the entry should be refreshed.
    ///
    /// Past max age an entry is always stale. Past the staleness threshold it
    /// is stale unless the device is in low power mode. A missing entry is
    /// stale.
    pub async fn is_stale(&self, latitude: f64, longitude: f64) -> bool {
        let key = CacheKey::from_coordinates(latitude, longitude);
        let now = self.clock.now();
        let mut index = self.index.lock().await;
        let Some(meta) = index.get(&key).await else {
            return true;
        };

        let age = meta.age(now);
        if age > self.limits.max_age {
            return true;
        }
        age > self.limits.staleness && !self.power.is_low_power()
    }

    /// Clear the memory tier in response to memory pressure.
    ///
    /// Index records for the most recently accessed entries stay resident so
    /// promotion from disk stays cheap for hot locations. Entries that never
    /// reached disk are dropped along with the memory tier.
    pub async fn handle_memory_pressure(&self) {
        let mut index = self.index.lock().await;
        index.ensure_complete().await;
        self.memory.lock().clear();
        for key in index.unpersisted() {
            index.remove(&key);
        }
        index.persist().await;
        index.retain_hottest(self.limits.hot_entries);
        tracing::info!(
            "Memory pressure: cleared memory tier, {} index records resident",
            index.len()
        );
    }

    /// Delete the entry for a coordinate from both tiers
    pub async fn remove(&self, latitude: f64, longitude: f64) {
        let key = CacheKey::from_coordinates(latitude, longitude);
        let _guard = self.key_locks.lock(&key).await;
        let mut index = self.index.lock().await;
        index.ensure_complete().await;
        index.remove(&key);
        self.disk.remove(&key).await;
        self.memory.lock().remove(&key);
        index.persist().await;
    }

    /// Delete every entry
    pub async fn clear(&self) {
        let mut index = self.index.lock().await;
        index.ensure_complete().await;
        let mut keys: HashSet<CacheKey> = index.keys().into_iter().collect();
        keys.extend(self.disk.keys().await);
        for key in &keys {
            self.disk.remove(key).await;
        }
        self.memory.lock().clear();
        index.clear();
        index.persist().await;
        tracing::info!("Cache cleared ({} entries)", keys.len());
    }

    /// Delete entries older than the max age, returning how many went
    pub async fn prune_expired(&self) -> usize {
        let mut index = self.index.lock().await;
        index.ensure_complete().await;
        let removed = self.prune_expired_locked(&mut index).await;
        if removed > 0 {
            index.persist().await;
        }
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        let mut index = self.index.lock().await;
        index.ensure_complete().await;
        let memory = self.memory.lock();
        CacheStats {
            memory_entries: memory.len(),
            memory_bytes: memory.bytes(),
            disk_entries: index.persisted_len(),
            disk_bytes: index.disk_bytes(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Write access stats recorded by cache hits to the index file
    pub async fn flush(&self) {
        self.index.lock().await.flush().await;
    }

    /// Remove a key from the index and both tiers
    async fn discard(&self, index: &mut MetadataIndex, key: &CacheKey) {
        index.remove(key);
        self.disk.remove(key).await;
        self.memory.lock().remove(key);
    }

    /// Drop index records of memory-only entries that just left the memory tier
    fn forget_unpersisted(&self, index: &mut MetadataIndex, keys: &[CacheKey]) {
        let forgotten = keys
            .iter()
            .filter(|key| index.remove_unpersisted(key))
            .count();
        if forgotten > 0 {
            tracing::debug!("Dropped {} memory-only entries", forgotten);
        }
    }

    async fn prune_expired_locked(&self, index: &mut MetadataIndex) -> usize {
        let cutoff = self.clock.now() - self.limits.max_age;
        let expired = index.stored_before(cutoff);
        for key in &expired {
            self.discard(index, key).await;
        }
        if !expired.is_empty() {
            tracing::info!("Pruned {} expired cache entries", expired.len());
        }
        expired.len()
    }

    /// Evict least recently accessed entries once the disk budget is
    /// exceeded, until usage falls to the target.
    async fn enforce_disk_budget(&self, index: &mut MetadataIndex, just_written: &CacheKey) {
        let mut total = index.disk_bytes();
        if total <= self.limits.disk_budget_bytes {
            return;
        }

        let before = total;
        let mut evicted = 0usize;
        for victim in index.lru_order() {
            if total <= self.limits.disk_target_bytes {
                break;
            }
            if &victim == just_written {
                continue;
            }
            let Some(meta) = index.remove(&victim) else {
                continue;
            };
            if meta.disk_bytes() == 0 {
                index.upsert(meta);
                continue;
            }
            total -= meta.disk_bytes();
            self.disk.remove(&victim).await;
            self.memory.lock().remove(&victim);
            evicted += 1;
        }

        tracing::info!(
            "Disk budget exceeded ({} bytes): evicted {} entries, {} bytes tracked",
            before,
            evicted,
            total
        );
    }

    /// Drop payload files the index does not track and index records whose
    /// payload file is gone.
    async fn reconcile(&self) {
        let mut index = self.index.lock().await;
        index.ensure_complete().await;

        let tracked: HashSet<CacheKey> = index.keys().into_iter().collect();
        let on_disk = self.disk.keys().await;
        let on_disk_set: HashSet<&CacheKey> = on_disk.iter().collect();

        let mut orphans = 0usize;
        for key in on_disk.iter().filter(|k| !tracked.contains(*k)) {
            self.disk.remove(key).await;
            orphans += 1;
        }

        // Memory-only entries did not survive the restart
        let mut dangling = 0usize;
        for key in index.unpersisted() {
            self.disk.remove(&key).await;
            index.remove(&key);
            dangling += 1;
        }
        for key in tracked.iter().filter(|k| !on_disk_set.contains(k)) {
            if index.remove(key).is_some() {
                dangling += 1;
            }
        }

        if orphans > 0 || dangling > 0 {
            tracing::warn!(
                "Cache reconciled: removed {} untracked payloads, {} records without payload",
                orphans,
                dangling
            );
            index.persist().await;
        }
    }

    #[cfg(test)]
    async fn resident_index_len(&self) -> usize {
        self.index.lock().await.len()
    }
}
