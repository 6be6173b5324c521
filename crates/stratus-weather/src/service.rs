//! The component that owns weather fetches.
//!
//! Serves cached data while it is fresh, fetches otherwise, and writes every
//! successful fetch through the cache and the shared location record. When a
//! fetch fails, whatever the cache still holds is served instead.

use std::sync::Arc;

use crate::cache::CacheStore;
use crate::location::SharedLocationStore;
use crate::provider::WeatherFetcher;
use crate::types::{Coordinate, WeatherData, WeatherError};

/// Where a [`WeatherReport`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// Cached and within the staleness threshold
    Cache,
    /// Fetched just now
    Network,
    /// Cached and stale; the fetch that should have replaced it failed
    StaleCache,
}

#[derive(Debug, Clone)]
pub struct WeatherReport {
    pub data: WeatherData,
    pub source: DataSource,
}

pub struct WeatherService {
    fetcher: Arc<dyn WeatherFetcher>,
    cache: Arc<CacheStore<WeatherData>>,
    location: Arc<SharedLocationStore>,
}

impl WeatherService {
    pub fn new(
        fetcher: Arc<dyn WeatherFetcher>,
        cache: Arc<CacheStore<WeatherData>>,
        location: Arc<SharedLocationStore>,
    ) -> Self {
        Self {
            fetcher,
            cache,
            location,
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore<WeatherData>> {
        &self.cache
    }

    pub fn location_store(&self) -> &Arc<SharedLocationStore> {
        &self.location
    }

    /// Weather for a location, from cache when fresh.
    ///
    /// Only fails when the fetch fails and nothing is cached.
    pub async fn weather(
        &self,
        coordinate: Coordinate,
        display_name: &str,
    ) -> Result<WeatherReport, WeatherError> {
        let (lat, lon) = (coordinate.latitude, coordinate.longitude);

        if !self.cache.is_stale(lat, lon).await {
            if let Some(entry) = self.cache.get(lat, lon).await {
                return Ok(WeatherReport {
                    data: entry.payload,
                    source: DataSource::Cache,
                });
            }
        }

        match self.fetch_and_store(coordinate, display_name, false).await {
            Ok(data) => Ok(WeatherReport {
                data,
                source: DataSource::Network,
            }),
            Err(e) => match self.cache.get(lat, lon).await {
                Some(entry) => {
                    tracing::warn!("Weather fetch failed, serving stale data: {}", e);
                    Ok(WeatherReport {
                        data: entry.payload,
                        source: DataSource::StaleCache,
                    })
                }
                None => Err(e),
            },
        }
    }

    /// Fetch bypassing every cache and store the result
    pub async fn refresh(
        &self,
        coordinate: Coordinate,
        display_name: &str,
    ) -> Result<WeatherData, WeatherError> {
        self.fetch_and_store(coordinate, display_name, true).await
    }

    async fn fetch_and_store(
        &self,
        coordinate: Coordinate,
        display_name: &str,
        force_refresh: bool,
    ) -> Result<WeatherData, WeatherError> {
        let data = self.fetcher.fetch(coordinate, force_refresh).await?;

        self.cache
            .put(coordinate.latitude, coordinate.longitude, data.clone())
            .await;
        if let Err(e) = self
            .location
            .write(coordinate.latitude, coordinate.longitude, display_name)
            .await
        {
            tracing::warn!("Failed to update shared location: {}", e);
        }

        tracing::info!(
            "Weather updated for {} ({:.4}, {:.4})",
            display_name,
            coordinate.latitude,
            coordinate.longitude
        );
        Ok(data)
    }
}
