use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::key::CacheKey;

/// Freshness and size bookkeeping for one cached location.
///
/// Kept apart from the payload so staleness and quota decisions never need
/// to deserialize weather data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub key: CacheKey,
    pub stored_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub size_bytes: u64,
    /// False when the disk write failed and only the memory tier holds data
    #[serde(default = "default_persisted")]
    pub persisted: bool,
}

fn default_persisted() -> bool {
    true
}

impl EntryMetadata {
    pub fn new(key: CacheKey, now: DateTime<Utc>, size_bytes: u64) -> Self {
        Self {
            key,
            stored_at: now,
            last_accessed_at: now,
            access_count: 0,
            size_bytes,
            persisted: true,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.stored_at
    }

    pub(crate) fn record_access(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Bytes counted against the disk budget
    pub(crate) fn disk_bytes(&self) -> u64 {
        if self.persisted {
            self.size_bytes
        } else {
            0
        }
    }
}

/// A cached payload together with its metadata
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub metadata: EntryMetadata,
    pub payload: T,
}

impl<T> CacheEntry<T> {
    pub fn key(&self) -> &CacheKey {
        &self.metadata.key
    }

    pub fn stored_at(&self) -> DateTime<Utc> {
        self.metadata.stored_at
    }

    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        self.metadata.last_accessed_at
    }

    pub fn access_count(&self) -> u64 {
        self.metadata.access_count
    }

    pub fn size_bytes(&self) -> u64 {
        self.metadata.size_bytes
    }
}

/// On-disk form of a payload
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredPayload<T> {
    pub key: CacheKey,
    pub stored_at: DateTime<Utc>,
    pub payload: T,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn access_updates_recency_and_count() {
        let t0 = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        let mut meta = EntryMetadata::new(CacheKey::from_coordinates(1.0, 2.0), t0, 512);
        assert_eq!(meta.access_count, 0);

        let t1 = t0 + Duration::minutes(3);
        meta.record_access(t1);
        meta.record_access(t1);
        assert_eq!(meta.access_count, 2);
        assert_eq!(meta.last_accessed_at, t1);
        assert_eq!(meta.stored_at, t0);
        assert_eq!(meta.age(t1), Duration::minutes(3));
    }

    #[test]
    fn unpersisted_entries_cost_no_disk() {
        let now = Utc::now();
        let mut meta = EntryMetadata::new(CacheKey::from_coordinates(1.0, 2.0), now, 512);
        assert_eq!(meta.disk_bytes(), 512);
        meta.persisted = false;
        assert_eq!(meta.disk_bytes(), 0);
    }

    #[test]
    fn persisted_defaults_to_true_when_absent() {
        let json = r#"{"key":"1.0000_2.0000","stored_at":"2026-05-01T09:00:00Z",
            "last_accessed_at":"2026-05-01T09:00:00Z","access_count":4,"size_bytes":10}"#;
        let meta: EntryMetadata = serde_json::from_str(json).unwrap();
        assert!(meta.persisted);
        assert_eq!(meta.access_count, 4);
    }
}
