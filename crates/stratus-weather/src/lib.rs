//! Weather data for Stratus
//!
//! Open-Meteo fetches, a two-tier cache of the last good snapshot per
//! location, and the shared last-known-location record.

pub mod cache;
pub mod location;
pub mod power;
pub mod provider;
pub mod retry;
pub mod service;
pub mod types;

pub use cache::{CacheEntry, CacheKey, CacheLimits, CacheStats, CacheStore, EntryMetadata};
pub use location::{LastKnownLocation, SharedLocationStore};
pub use power::{PowerMonitor, PowerState};
pub use provider::{OpenMeteoProvider, WeatherFetcher};
pub use retry::RetryConfig;
pub use service::{DataSource, WeatherReport, WeatherService};
pub use types::*;
