//! Weather fetch capability and the Open-Meteo client behind it.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use stratus_core::{Clock, ProviderConfig};

use crate::retry::{with_retry, RetryConfig};
use crate::types::{
    Coordinate, CurrentWeather, DayForecast, TemperatureUnit, WeatherCondition, WeatherData,
    WeatherError,
};

const FORECAST_DAYS: u8 = 7;

/// Anything that can produce a weather snapshot for a coordinate
#[async_trait]
pub trait WeatherFetcher: Send + Sync {
    /// Fetch current conditions and forecast.
    ///
    /// `force_refresh` asks intermediaries not to serve a cached response.
    async fn fetch(
        &self,
        coordinate: Coordinate,
        force_refresh: bool,
    ) -> Result<WeatherData, WeatherError>;
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: CurrentBlock,
    daily: DailyBlock,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    temperature_2m: f64,
    apparent_temperature: f64,
    relative_humidity_2m: f64,
    wind_speed_10m: f64,
    weather_code: i32,
}

#[derive(Debug, Deserialize)]
struct DailyBlock {
    time: Vec<NaiveDate>,
    temperature_2m_max: Vec<f64>,
    temperature_2m_min: Vec<f64>,
    weather_code: Vec<i32>,
    #[serde(default)]
    precipitation_probability_max: Vec<Option<f64>>,
}

fn percent(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

impl DailyBlock {
    fn into_forecast(self) -> Result<Vec<DayForecast>, WeatherError> {
        let days = self.time.len();
        if self.temperature_2m_max.len() != days
            || self.temperature_2m_min.len() != days
            || self.weather_code.len() != days
        {
            return Err(WeatherError::Parse(
                "daily arrays have mismatched lengths".to_string(),
            ));
        }

        Ok(self
            .time
            .into_iter()
            .enumerate()
            .map(|(i, date)| DayForecast {
                date,
                high: self.temperature_2m_max[i],
                low: self.temperature_2m_min[i],
                condition: WeatherCondition::from_wmo_code(self.weather_code[i]),
                precipitation_chance: self
                    .precipitation_probability_max
                    .get(i)
                    .copied()
                    .flatten()
                    .map(percent)
                    .unwrap_or(0),
            })
            .collect())
    }
}

/// Open-Meteo forecast client
#[derive(Clone)]
pub struct OpenMeteoProvider {
    client: Client,
    base_url: String,
    unit: TemperatureUnit,
    retry: RetryConfig,
    clock: Arc<dyn Clock>,
}

impl OpenMeteoProvider {
    pub fn new(config: &ProviderConfig, clock: Arc<dyn Clock>) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            unit: config.temperature_unit,
            retry: RetryConfig {
                max_retries: config.max_retries,
                ..RetryConfig::default()
            },
            clock,
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_once(
        &self,
        coordinate: Coordinate,
        force_refresh: bool,
    ) -> Result<WeatherData, WeatherError> {
        let url = format!("{}/v1/forecast", self.base_url);
        let mut request = self.client.get(&url).query(&[
            ("latitude", coordinate.latitude.to_string()),
            ("longitude", coordinate.longitude.to_string()),
            (
                "current",
                concat!(
                    "temperature_2m,apparent_temperature,relative_humidity_2m,",
                    "wind_speed_10m,weather_code"
                )
                .to_string(),
            ),
            (
                "daily",
                "temperature_2m_max,temperature_2m_min,weather_code,precipitation_probability_max"
                    .to_string(),
            ),
            ("temperature_unit", self.unit.as_query().to_string()),
            ("forecast_days", FORECAST_DAYS.to_string()),
            ("timezone", "auto".to_string()),
        ]);
        if force_refresh {
            request = request.header(reqwest::header::CACHE_CONTROL, "no-cache");
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WeatherError::Api {
                status: status.as_u16(),
            });
        }

        let body: ForecastResponse = response
            .json()
            .await
            .map_err(|e| WeatherError::Parse(e.to_string()))?;

        Ok(WeatherData {
            coordinate,
            current: CurrentWeather {
                temperature: body.current.temperature_2m,
                feels_like: body.current.apparent_temperature,
                humidity: percent(body.current.relative_humidity_2m),
                wind_speed: body.current.wind_speed_10m,
                condition: WeatherCondition::from_wmo_code(body.current.weather_code),
            },
            daily: body.daily.into_forecast()?,
            fetched_at: self.clock.now(),
        })
    }
}

#[async_trait]
impl WeatherFetcher for OpenMeteoProvider {
    async fn fetch(
        &self,
        coordinate: Coordinate,
        force_refresh: bool,
    ) -> Result<WeatherData, WeatherError> {
        if !coordinate.is_valid() {
            return Err(WeatherError::InvalidCoordinate {
                latitude: coordinate.latitude,
                longitude: coordinate.longitude,
            });
        }

        tracing::debug!(
            "Fetching weather for ({:.4}, {:.4}), force_refresh={}",
            coordinate.latitude,
            coordinate.longitude,
            force_refresh
        );
        with_retry(&self.retry, || self.fetch_once(coordinate, force_refresh)).await
    }
}
