pub mod app;
pub mod clock;
pub mod config;
pub mod error;
pub mod record;

pub use app::App;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CacheConfig, Config, ProviderConfig, RefreshConfig, TemperatureUnit, ValidationResult,
};
pub use error::{AppError, ConfigError, NetworkError, SchedulerError, StorageError};

use anyhow::Result;

/// Initialize logging for the process
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::info!("Stratus core initialized");
    Ok(())
}
