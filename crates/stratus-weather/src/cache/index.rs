//! Metadata index for the disk tier.
//!
//! The index is resident in memory and mirrored to `metadata.json`. After a
//! memory-pressure signal only the hottest records stay resident; the rest are
//! reloaded from the file the next time a complete view is needed.
//!
//! Access stats from cache hits only mark the index dirty; they reach the
//! file with the next write or an explicit flush.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use stratus_core::record;

use super::entry::EntryMetadata;
use super::key::CacheKey;

pub(crate) const INDEX_VERSION: u32 = 1;

pub(crate) struct MetadataIndex {
    path: PathBuf,
    records: HashMap<CacheKey, EntryMetadata>,
    complete: bool,
    dirty: bool,
}

impl MetadataIndex {
    /// Load the index file; unreadable or missing files start empty
    pub async fn load(path: PathBuf) -> Self {
        let records = Self::read_records(&path).await;
        Self {
            path,
            records,
            complete: true,
            dirty: false,
        }
    }

    async fn read_records(path: &std::path::Path) -> HashMap<CacheKey, EntryMetadata> {
        let list: Vec<EntryMetadata> = record::load_or_none(path, INDEX_VERSION)
            .await
            .unwrap_or_default();
        list.into_iter().map(|m| (m.key.clone(), m)).collect()
    }

    /// Bring back records dropped by [`Self::retain_hottest`].
    ///
    /// Resident records are newer than the file and win on conflict.
    pub async fn ensure_complete(&mut self) {
        if self.complete {
            return;
        }
        let mut on_disk = Self::read_records(&self.path).await;
        on_disk.extend(self.records.drain());
        self.records = on_disk;
        self.complete = true;
        tracing::debug!("Reloaded cache index ({} records)", self.records.len());
    }

    /// Look up a record, reloading the full index if it is not resident
    pub async fn get(&mut self, key: &CacheKey) -> Option<&EntryMetadata> {
        if !self.records.contains_key(key) {
            self.ensure_complete().await;
        }
        self.records.get(key)
    }

    /// Record a cache hit, returning the updated record
    pub async fn touch(&mut self, key: &CacheKey, at: DateTime<Utc>) -> Option<EntryMetadata> {
        if !self.records.contains_key(key) {
            self.ensure_complete().await;
        }
        let meta = self.records.get_mut(key)?;
        meta.record_access(at);
        self.dirty = true;
        Some(meta.clone())
    }

    pub fn upsert(&mut self, meta: EntryMetadata) {
        self.records.insert(meta.key.clone(), meta);
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<EntryMetadata> {
        self.records.remove(key)
    }

    /// Drop a resident record if its payload never reached disk
    pub fn remove_unpersisted(&mut self, key: &CacheKey) -> bool {
        if self.records.get(key).is_some_and(|m| !m.persisted) {
            self.records.remove(key);
            return true;
        }
        false
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.complete = true;
    }

    /// Keys of all records (caller must have ensured completeness)
    pub fn keys(&self) -> Vec<CacheKey> {
        self.records.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Records backed by a payload file
    pub fn persisted_len(&self) -> usize {
        self.records.values().filter(|m| m.persisted).count()
    }

    /// Keys of records whose payload only ever lived in memory
    pub fn unpersisted(&self) -> Vec<CacheKey> {
        self.records
            .values()
            .filter(|m| !m.persisted)
            .map(|m| m.key.clone())
            .collect()
    }

    /// Bytes tracked against the disk budget
    pub fn disk_bytes(&self) -> u64 {
        self.records.values().map(EntryMetadata::disk_bytes).sum()
    }

    /// Keys in least-recently-accessed order (oldest first)
    pub fn lru_order(&self) -> Vec<CacheKey> {
        let mut records: Vec<&EntryMetadata> = self.records.values().collect();
        records.sort_by(|a, b| {
            a.last_accessed_at
                .cmp(&b.last_accessed_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        records.into_iter().map(|m| m.key.clone()).collect()
    }

    /// Keys whose entries were stored before `cutoff`
    pub fn stored_before(&self, cutoff: DateTime<Utc>) -> Vec<CacheKey> {
        self.records
            .values()
            .filter(|m| m.stored_at < cutoff)
            .map(|m| m.key.clone())
            .collect()
    }

    /// Drop all but the `keep` most recently accessed records from memory
    pub fn retain_hottest(&mut self, keep: usize) {
        if self.records.len() <= keep {
            return;
        }
        let order = self.lru_order();
        let cold = order.len() - keep;
        for key in &order[..cold] {
            self.records.remove(key);
        }
        self.complete = false;
    }

    #[cfg(test)]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Write the index file. A partial index is never written over the file.
    pub async fn persist(&mut self) {
        if !self.complete {
            tracing::debug!("Skipping persist of partial cache index");
            return;
        }
        let mut list: Vec<&EntryMetadata> = self.records.values().collect();
        list.sort_by(|a, b| a.key.cmp(&b.key));
        match record::store(&self.path, INDEX_VERSION, &list).await {
            Ok(_) => self.dirty = false,
            Err(e) => tracing::warn!("Failed to persist cache index: {}", e),
        }
    }

    /// Write pending access stats, if any
    pub async fn flush(&mut self) {
        if self.dirty {
            self.ensure_complete().await;
            self.persist().await;
        }
    }
}
