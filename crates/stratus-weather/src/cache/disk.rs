use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use stratus_core::{record, StorageError};

use super::entry::StoredPayload;
use super::key::CacheKey;

pub(crate) const PAYLOAD_VERSION: u32 = 1;

/// Directory of serialized payloads, one file per cache key
pub(crate) struct DiskTier {
    entries_dir: PathBuf,
}

impl DiskTier {
    pub fn new(root: &Path) -> Self {
        Self {
            entries_dir: root.join("entries"),
        }
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.entries_dir.join(key.file_name())
    }

    /// Read a payload. Unreadable files are logged and reported as a miss.
    pub async fn read<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<StoredPayload<T>> {
        let stored: StoredPayload<T> =
            record::load_or_none(&self.path_for(key), PAYLOAD_VERSION).await?;
        if &stored.key != key {
            tracing::warn!("Payload file for {} holds key {}, ignoring", key, stored.key);
            return None;
        }
        Some(stored)
    }

    /// Encode a payload without writing it, returning the bytes
    pub fn encode<T: Serialize>(stored: &StoredPayload<T>) -> Result<Vec<u8>, StorageError> {
        record::encode(PAYLOAD_VERSION, stored)
    }

    pub async fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), StorageError> {
        record::write_atomic(&self.path_for(key), bytes).await
    }

    pub async fn remove(&self, key: &CacheKey) {
        if let Err(e) = record::remove(&self.path_for(key)).await {
            tracing::warn!("Failed to delete cached payload {}: {}", key, e);
        }
    }

    /// Keys of every payload file currently on disk
    pub async fn keys(&self) -> Vec<CacheKey> {
        let mut keys = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.entries_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return keys,
            Err(e) => {
                tracing::warn!("Failed to list cache directory: {}", e);
                return keys;
            }
        };

        loop {
            match dir.next_entry().await {
                Ok(Some(entry)) => {
                    if let Some(key) = entry.file_name().to_str().and_then(CacheKey::from_file_name)
                    {
                        keys.push(key);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Failed to list cache directory: {}", e);
                    break;
                }
            }
        }
        keys
    }
}
