//! Versioned JSON records on disk.
//!
//! Every persisted artifact is wrapped in `{ "version": N, "data": ... }`.
//! Readers treat a version mismatch the same as a parse failure, and writers
//! replace files atomically (temp file + rename) so a reader never observes a
//! partially written record.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    data: T,
}

#[derive(Deserialize)]
struct VersionOnly {
    version: u32,
}

/// Serialize `data` inside a version envelope
pub fn encode<T: Serialize + ?Sized>(version: u32, data: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(&Envelope { version, data })
        .map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Parse an envelope, rejecting any version other than `expected`
pub fn decode<T: DeserializeOwned>(bytes: &[u8], expected: u32) -> Result<T, StorageError> {
    let header: VersionOnly =
        serde_json::from_slice(bytes).map_err(|e| StorageError::Corruption(e.to_string()))?;
    if header.version != expected {
        return Err(StorageError::VersionMismatch {
            found: header.version,
            expected,
        });
    }
    let envelope: Envelope<T> =
        serde_json::from_slice(bytes).map_err(|e| StorageError::Corruption(e.to_string()))?;
    Ok(envelope.data)
}

/// Read a file, mapping "not found" to `None`
pub async fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

/// Replace `path` with `bytes` atomically
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(parent, e))?;
    }

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| StorageError::io(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StorageError::io(path, e));
    }
    Ok(())
}

/// Remove a file; a file that is already gone is not an error
pub async fn remove(path: &Path) -> Result<(), StorageError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

/// Load a record, treating absence and unreadable content alike as `None`.
///
/// Failures other than "not found" are logged.
pub async fn load_or_none<T: DeserializeOwned>(path: &Path, version: u32) -> Option<T> {
    let bytes = match read_bytes(path).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };

    match decode(&bytes, version) {
        Ok(data) => Some(data),
        Err(e) => {
            tracing::warn!("Discarding unreadable record {}: {}", path.display(), e);
            None
        }
    }
}

/// Encode and atomically write a record, returning the bytes written
pub async fn store<T: Serialize + ?Sized>(
    path: &Path,
    version: u32,
    data: &T,
) -> Result<u64, StorageError> {
    let bytes = encode(version, data)?;
    write_atomic(path, &bytes).await?;
    Ok(bytes.len() as u64)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn decode_rejects_other_versions() {
        let bytes = encode(2, &Sample { name: "a".into(), count: 1 }).unwrap();
        let err = decode::<Sample>(&bytes, 1).unwrap_err();
        assert!(matches!(
            err,
            StorageError::VersionMismatch {
                found: 2,
                expected: 1
            }
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode::<Sample>(b"{not json", 1).unwrap_err();
        assert!(matches!(err, StorageError::Corruption(_)));
    }

    #[tokio::test]
    async fn store_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deep").join("sample.json");
        let sample = Sample {
            name: "sf".into(),
            count: 3,
        };

        let written = store(&path, 1, &sample).await.unwrap();
        assert_eq!(written, std::fs::metadata(&path).unwrap().len());
        assert!(!temp_path(&path).exists());

        let loaded: Option<Sample> = load_or_none(&path, 1).await;
        assert_eq!(loaded, Some(sample));
    }

    #[tokio::test]
    async fn missing_and_corrupt_files_load_as_none() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(load_or_none::<Sample>(&missing, 1).await.is_none());

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, b"\x00\x01garbage").unwrap();
        assert!(load_or_none::<Sample>(&corrupt, 1).await.is_none());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.json");
        std::fs::write(&path, b"{}").unwrap();

        remove(&path).await.unwrap();
        remove(&path).await.unwrap();
        assert!(!path.exists());
    }
}
