use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

const APP_DIR_NAME: &str = "stratus";

/// A single problem found in the configuration, keyed by its TOML path
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigIssue {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.field)
    }
}

/// Issues found by [`Config::validate`]. Errors block startup, warnings are logged.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigIssue>,
    pub warnings: Vec<ConfigIssue>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(ConfigIssue {
            field,
            message: message.into(),
        });
    }

    fn warn(&mut self, field: &'static str, message: impl Into<String>) {
        self.warnings.push(ConfigIssue {
            field,
            message: message.into(),
        });
    }

    fn require_nonzero(&mut self, field: &'static str, value: u64) {
        if value == 0 {
            self.error(field, "must be greater than 0");
        }
    }

    fn require_fraction(&mut self, field: &'static str, value: f64) {
        if !(value > 0.0 && value <= 1.0) {
            self.error(field, format!("must be in (0, 1], got {}", value));
        }
    }

    /// Errors joined into one line, for startup failures
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        parts.join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for cache, refresh state and shared records
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Weather cache policy
    #[serde(default)]
    pub cache: CacheConfig,

    /// Background refresh policy
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Weather API settings
    #[serde(default)]
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Age after which an entry is stale unless the device is power constrained
    pub staleness_minutes: u32,

    /// Age after which an entry is stale regardless of power state
    pub max_age_hours: u32,

    /// On-disk budget in megabytes
    pub disk_budget_mb: u64,

    /// Fraction of the disk budget to evict down to
    pub disk_target_ratio: f64,

    /// Maximum number of entries held in memory
    pub memory_item_limit: usize,

    /// In-memory budget in megabytes
    pub memory_budget_mb: u64,

    /// Index records kept resident after a memory-pressure signal
    pub hot_entries_on_pressure: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            staleness_minutes: 15,
            max_age_hours: 6,
            disk_budget_mb: 200,
            disk_target_ratio: 0.8,
            memory_item_limit: 20,
            memory_budget_mb: 50,
            hot_entries_on_pressure: 5,
        }
    }
}

impl CacheConfig {
    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.staleness_minutes))
    }

    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.max_age_hours))
    }

    pub fn disk_budget_bytes(&self) -> u64 {
        self.disk_budget_mb.saturating_mul(1_048_576)
    }

    /// Size the disk tier is trimmed to once the budget is exceeded
    pub fn disk_target_bytes(&self) -> u64 {
        (self.disk_budget_bytes() as f64 * self.disk_target_ratio) as u64
    }

    pub fn memory_budget_bytes(&self) -> u64 {
        self.memory_budget_mb.saturating_mul(1_048_576)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Background refresh enabled
    pub enabled: bool,

    /// Minimum gap between completed refreshes
    pub min_interval_minutes: u32,

    /// Ceiling on how long data may go without a refresh
    pub max_interval_hours: u32,

    /// Delay used when no confident usage window exists
    pub fallback_hours: u32,

    /// Normalized score an hour needs to count as an optimal window
    pub confidence_threshold: f64,

    /// How far ahead of the predicted hour the refresh runs
    pub lead_minutes: u32,

    /// Usage samples older than this are discarded
    pub sample_window_days: u32,

    /// Wall-clock budget for one background job
    pub job_budget_seconds: u64,

    /// Fixed UTC offset for hour-of-day bucketing; local offset when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_minutes: 30,
            max_interval_hours: 4,
            fallback_hours: 2,
            confidence_threshold: 0.6,
            lead_minutes: 15,
            sample_window_days: 7,
            job_budget_seconds: 30,
            utc_offset_minutes: None,
        }
    }
}

impl RefreshConfig {
    pub fn min_interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.min_interval_minutes))
    }

    pub fn max_interval(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.max_interval_hours))
    }

    pub fn fallback_delay(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.fallback_hours))
    }

    pub fn lead(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.lead_minutes))
    }

    pub fn sample_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.sample_window_days))
    }

    pub fn job_budget(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.job_budget_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the Open-Meteo compatible API
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_seconds: u64,

    /// Retries for transient failures
    pub max_retries: u32,

    /// Unit temperatures are requested in
    pub temperature_unit: TemperatureUnit,
}

/// Temperature unit requested from the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn as_query(&self) -> &'static str {
        match self {
            Self::Celsius => "celsius",
            Self::Fahrenheit => "fahrenheit",
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.open-meteo.com".to_string(),
            timeout_seconds: 10,
            max_retries: 3,
            temperature_unit: TemperatureUnit::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cache: CacheConfig::default(),
            refresh: RefreshConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, creating it if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Check limits and intervals for values the cache and scheduler cannot run with
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        let (cache, refresh, provider) = (&self.cache, &self.refresh, &self.provider);

        check_base_url(&provider.base_url, &mut result);
        result.require_nonzero("provider.timeout_seconds", provider.timeout_seconds);

        result.require_nonzero("cache.staleness_minutes", cache.staleness_minutes.into());
        result.require_nonzero("cache.max_age_hours", cache.max_age_hours.into());
        if cache.max_age_hours > 0 && cache.max_age() <= cache.staleness() {
            result.warn(
                "cache.max_age_hours",
                "max age is not longer than the staleness threshold",
            );
        }
        result.require_nonzero("cache.disk_budget_mb", cache.disk_budget_mb);
        result.require_fraction("cache.disk_target_ratio", cache.disk_target_ratio);
        result.require_nonzero("cache.memory_item_limit", cache.memory_item_limit as u64);
        if cache.memory_budget_mb > cache.disk_budget_mb {
            result.warn(
                "cache.memory_budget_mb",
                "memory budget is larger than the disk budget",
            );
        }

        result.require_fraction("refresh.confidence_threshold", refresh.confidence_threshold);
        result.require_nonzero("refresh.max_interval_hours", refresh.max_interval_hours.into());
        result.require_nonzero("refresh.fallback_hours", refresh.fallback_hours.into());
        if refresh.fallback_hours > refresh.max_interval_hours {
            result.error(
                "refresh.fallback_hours",
                "fallback delay exceeds the max refresh interval",
            );
        }
        if refresh.lead_minutes >= 60 {
            result.error("refresh.lead_minutes", "lead time must be under one hour");
        }
        result.require_nonzero("refresh.sample_window_days", refresh.sample_window_days.into());
        result.require_nonzero("refresh.job_budget_seconds", refresh.job_budget_seconds);
        if matches!(refresh.utc_offset_minutes, Some(offset) if offset.abs() >= 24 * 60) {
            result.error("refresh.utc_offset_minutes", "offset must be within one day");
        }
        if !refresh.enabled {
            result.warn("refresh.enabled", "background refresh disabled");
        }

        result
    }

    /// Directory holding cached weather payloads and their index
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    /// Directory holding usage patterns and refresh settings
    pub fn refresh_dir(&self) -> PathBuf {
        self.data_dir.join("refresh")
    }

    /// Directory readable by out-of-process consumers
    pub fn shared_dir(&self) -> PathBuf {
        self.data_dir.join("shared")
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join(APP_DIR_NAME);

        Ok(config_dir.join("config.toml"))
    }
}

fn check_base_url(raw: &str, result: &mut ValidationResult) {
    const FIELD: &str = "provider.base_url";
    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(e) => {
            result.error(FIELD, format!("invalid URL: {}", e));
            return;
        }
    };
    if !matches!(url.scheme(), "http" | "https") {
        result.error(FIELD, format!("unsupported scheme {}", url.scheme()));
    }
    if url.host().is_none() {
        result.error(FIELD, "missing host");
    }
}
