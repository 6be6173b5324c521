use std::sync::Arc;

use anyhow::{Context, Result};
use stratus_core::{App, AppError};
use stratus_refresh::{RefreshScheduler, TokioJobScheduler};
use stratus_weather::{
    CacheLimits, CacheStore, OpenMeteoProvider, PowerState, SharedLocationStore, WeatherService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize core
    stratus_core::init()?;

    let app = App::new().context("Failed to start Stratus")?;
    let config = app.config();

    let cache = Arc::new(
        CacheStore::open(
            config.cache_dir(),
            CacheLimits::from(&config.cache),
            app.clock(),
            Arc::new(PowerState::default()),
        )
        .await,
    );
    let location = Arc::new(SharedLocationStore::new(&config.shared_dir(), app.clock()));
    let provider = Arc::new(OpenMeteoProvider::new(&config.provider, app.clock())?);
    let weather = Arc::new(WeatherService::new(provider, cache.clone(), location.clone()));

    let jobs = Arc::new(TokioJobScheduler::new(
        app.clock(),
        config.refresh.job_budget(),
    )?);
    let scheduler = RefreshScheduler::open(&app, weather.clone(), jobs.clone()).await;

    println!("Stratus - weather cache and background refresh");
    println!("  Data directory: {}", config.data_dir.display());

    // Startup counts as a foreground session
    scheduler.on_foreground().await;
    if let Some(last) = location.read().await {
        match weather.weather(last.coordinate(), &last.display_name).await {
            Ok(report) => tracing::info!(
                "{}: {:.1} ({:?})",
                last.display_name,
                report.data.current.temperature,
                report.source
            ),
            Err(e) => {
                let err = AppError::from(e);
                tracing::warn!(
                    "Could not load weather for {}: {} ({})",
                    last.display_name,
                    err.user_message(),
                    err
                );
            }
        }
    }

    match scheduler.on_background().await {
        Some(at) => println!("  Next background refresh: {}", at),
        None => println!("  Background refresh not scheduled"),
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    let stats = cache.stats().await;
    tracing::info!(
        "Cache: {} entries, {} bytes on disk, {:.0}% hit rate",
        stats.disk_entries,
        stats.disk_bytes,
        stats.hit_rate()
    );

    // Graceful shutdown
    jobs.shutdown();
    cache.flush().await;
    app.shutdown();

    Ok(())
}
