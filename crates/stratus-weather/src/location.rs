//! Last known location shared with out-of-process consumers.
//!
//! A single JSON record in the shared directory, overwritten after every
//! successful fetch. Every read goes to the file so writes made by another
//! process are visible immediately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stratus_core::{record, Clock, StorageError};
use tokio::sync::Mutex;

use crate::types::Coordinate;

const LOCATION_VERSION: u32 = 1;
const LOCATION_FILE: &str = "last_location.json";

/// Where weather was last fetched successfully
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastKnownLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub display_name: String,
    pub updated_at: DateTime<Utc>,
}

impl LastKnownLocation {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

pub struct SharedLocationStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl SharedLocationStore {
    pub fn new(shared_dir: &Path, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: shared_dir.join(LOCATION_FILE),
            clock,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the stored location
    pub async fn write(
        &self,
        latitude: f64,
        longitude: f64,
        display_name: &str,
    ) -> Result<(), StorageError> {
        let location = LastKnownLocation {
            latitude,
            longitude,
            display_name: display_name.to_string(),
            updated_at: self.clock.now(),
        };

        let _guard = self.write_lock.lock().await;
        record::store(&self.path, LOCATION_VERSION, &location).await?;
        tracing::debug!(
            "Shared location updated: {} ({:.4}, {:.4})",
            location.display_name,
            latitude,
            longitude
        );
        Ok(())
    }

    /// The stored location, or `None` if never written or unreadable
    pub async fn read(&self) -> Option<LastKnownLocation> {
        record::load_or_none(&self.path, LOCATION_VERSION).await
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        record::remove(&self.path).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use chrono::{Duration, TimeZone};
    use stratus_core::ManualClock;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> (SharedLocationStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap(),
        ));
        (SharedLocationStore::new(dir.path(), clock.clone()), clock)
    }

    #[tokio::test]
    async fn read_before_write_is_none() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        assert!(store.read().await.is_none());
    }

    #[tokio::test]
    async fn write_overwrites_previous_value() {
        let dir = TempDir::new().unwrap();
        let (store, clock) = store(&dir);

        store.write(37.7749, -122.4194, "San Francisco").await.unwrap();
        clock.advance(Duration::minutes(5));
        store.write(40.7128, -74.0060, "New York").await.unwrap();

        let location = store.read().await.unwrap();
        assert_eq!(location.display_name, "New York");
        assert_eq!(location.coordinate(), Coordinate::new(40.7128, -74.0060));
        assert_eq!(location.updated_at, clock.now());
    }

    #[tokio::test]
    async fn second_reader_sees_writes() {
        let dir = TempDir::new().unwrap();
        let (writer, _) = store(&dir);
        let (reader, _) = store(&dir);

        writer.write(51.5074, -0.1278, "London").await.unwrap();
        assert_eq!(reader.read().await.unwrap().display_name, "London");
    }

    #[tokio::test]
    async fn unreadable_file_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        std::fs::write(store.path(), b"{ garbage").unwrap();
        assert!(store.read().await.is_none());

        // Still writable afterwards
        store.write(1.0, 2.0, "Somewhere").await.unwrap();
        assert!(store.read().await.is_some());
    }

    #[tokio::test]
    async fn clear_removes_value() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        store.write(1.0, 2.0, "Somewhere").await.unwrap();
        store.clear().await.unwrap();
        assert!(store.read().await.is_none());
        store.clear().await.unwrap();
    }
}
