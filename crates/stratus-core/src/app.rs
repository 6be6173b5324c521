use std::path::Path;
use std::sync::Arc;

use chrono::{FixedOffset, Local, Offset};

use crate::{AppError, Clock, Config, ConfigError, SystemClock};

/// Process-wide application context.
///
/// Created once at startup and handed to every component that needs the
/// configuration or the clock.
pub struct App {
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
}

impl App {
    /// Load the default configuration file and prepare data directories
    pub fn new() -> Result<Self, AppError> {
        let path = Config::config_path()?;
        Self::from_path(&path)
    }

    /// Load configuration from `path` and prepare data directories
    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let config = Config::load_from(path)
            .map_err(|e| ConfigError::ParseError(format!("{:#}", e)))?;
        Self::with_config(config, Arc::new(SystemClock))
    }

    /// Build from an already loaded configuration
    pub fn with_config(config: Config, clock: Arc<dyn Clock>) -> Result<Self, AppError> {
        let validation = config.validate();
        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.summary()).into());
        }
        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        for dir in [config.cache_dir(), config.refresh_dir(), config.shared_dir()] {
            std::fs::create_dir_all(&dir)?;
        }

        tracing::info!("Data directory: {}", config.data_dir.display());

        Ok(Self {
            config: Arc::new(config),
            clock,
        })
    }

    /// Offset used to bucket usage by local hour of day
    pub fn utc_offset(&self) -> FixedOffset {
        self.config
            .refresh
            .utc_offset_minutes
            .and_then(|minutes| FixedOffset::east_opt(minutes * 60))
            .unwrap_or_else(|| Local::now().offset().fix())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn shared_config(&self) -> Arc<Config> {
        self.config.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn shutdown(&self) {
        tracing::info!("Shutting down");
    }
}
