use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use stratus_core::record;
use tokio::sync::Mutex;

const SETTINGS_VERSION: u32 = 1;

/// User-facing background refresh settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshSettings {
    pub enabled: bool,
    pub last_completed_refresh: Option<DateTime<Utc>>,
}

/// Settings persisted at `refresh/settings.json`.
///
/// Reads are served from memory; updates are written through.
pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<RefreshSettings>,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    /// Load settings, falling back to `default_enabled` with no history
    pub async fn open(path: PathBuf, default_enabled: bool) -> Self {
        let current = record::load_or_none(&path, SETTINGS_VERSION)
            .await
            .unwrap_or(RefreshSettings {
                enabled: default_enabled,
                last_completed_refresh: None,
            });
        Self {
            path,
            current: RwLock::new(current),
            write_lock: Mutex::new(()),
        }
    }

    pub fn get(&self) -> RefreshSettings {
        self.current.read().clone()
    }

    pub fn enabled(&self) -> bool {
        self.current.read().enabled
    }

    pub fn last_completed_refresh(&self) -> Option<DateTime<Utc>> {
        self.current.read().last_completed_refresh
    }

    pub async fn set_enabled(&self, enabled: bool) {
        self.update(|s| s.enabled = enabled).await;
    }

    pub async fn record_completion(&self, at: DateTime<Utc>) {
        self.update(|s| s.last_completed_refresh = Some(at)).await;
    }

    async fn update(&self, change: impl FnOnce(&mut RefreshSettings)) {
        let _guard = self.write_lock.lock().await;
        let snapshot = {
            let mut current = self.current.write();
            change(&mut current);
            current.clone()
        };
        if let Err(e) = record::store(&self.path, SETTINGS_VERSION, &snapshot).await {
            tracing::warn!("Failed to persist refresh settings: {}", e);
        }
    }
}
