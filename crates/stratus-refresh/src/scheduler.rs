//! Predictive background refresh.
//!
//! Foreground transitions feed the usage model. Background transitions plan
//! the next refresh and submit it to the host, replacing whatever was
//! pending. When the host runs the job, the last known location is refreshed
//! and the following job is planned straight away, whatever the outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use stratus_core::{App, Clock};
use stratus_weather::WeatherService;

use crate::job::{
    JobContext, JobHandle, JobHandler, JobOutcome, JobRequest, JobScheduler, REFRESH_JOB_ID,
};
use crate::planner::{HourlyConfidence, PlannerConfig, RefreshPlan, RefreshPlanner};
use crate::settings::{RefreshSettings, SettingsStore};
use crate::usage::{UsagePattern, UsageStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No job pending
    Idle,
    /// App in the foreground, usage being recorded
    Learning,
    /// One job pending with the host
    Scheduled,
    /// The host is running the refresh job
    Executing,
}

#[derive(Debug, Clone, Copy)]
struct PendingJob {
    handle: JobHandle,
    at: DateTime<Utc>,
}

struct Inner {
    state: SchedulerState,
    pending: Option<PendingJob>,
}

pub struct RefreshScheduler {
    clock: Arc<dyn Clock>,
    planner: RefreshPlanner,
    usage: UsageStore,
    settings: SettingsStore,
    jobs: Arc<dyn JobScheduler>,
    weather: Arc<WeatherService>,
    inner: Mutex<Inner>,
    // Serializes cancel-then-submit so only one job is ever pending
    scheduling: tokio::sync::Mutex<()>,
}

impl RefreshScheduler {
    /// Open persisted usage and settings and register with the job host
    pub async fn open(
        app: &App,
        weather: Arc<WeatherService>,
        jobs: Arc<dyn JobScheduler>,
    ) -> Arc<Self> {
        let config = &app.config().refresh;
        let dir = app.config().refresh_dir();
        let offset = app.utc_offset();

        let usage = UsageStore::open(
            dir.join("usage_patterns.json"),
            offset,
            config.sample_window(),
        )
        .await;
        let settings = SettingsStore::open(dir.join("settings.json"), config.enabled).await;

        let scheduler = Arc::new(Self {
            clock: app.clock(),
            planner: RefreshPlanner::new(PlannerConfig::from(config), offset),
            usage,
            settings,
            jobs,
            weather,
            inner: Mutex::new(Inner {
                state: SchedulerState::Idle,
                pending: None,
            }),
            scheduling: tokio::sync::Mutex::new(()),
        });

        let handler: Weak<dyn JobHandler> = Arc::downgrade(&scheduler) as Weak<dyn JobHandler>;
        scheduler.jobs.register(REFRESH_JOB_ID, handler);
        scheduler
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.lock().state
    }

    /// Earliest start of the pending job, if any
    pub fn pending_job(&self) -> Option<(JobHandle, DateTime<Utc>)> {
        self.inner.lock().pending.map(|p| (p.handle, p.at))
    }

    pub fn settings(&self) -> RefreshSettings {
        self.settings.get()
    }

    pub async fn usage_patterns(&self) -> Vec<UsagePattern> {
        self.usage.patterns(self.clock.now()).await
    }

    /// Normalized usage confidence per local hour
    pub async fn hourly_confidence(&self) -> HourlyConfidence {
        let now = self.clock.now();
        let patterns = self.usage.patterns(now).await;
        self.planner.confidence(&patterns, now)
    }

    /// The app came to the foreground
    pub async fn on_foreground(&self) {
        self.set_state(SchedulerState::Learning);
        let pattern = self.usage.record(self.clock.now()).await;
        tracing::debug!(
            "Recorded usage at {:02}:00 day {} (frequency {})",
            pattern.hour_of_day,
            pattern.day_of_week,
            pattern.frequency
        );
    }

    /// The app went to the background; plan and submit the next refresh
    pub async fn on_background(&self) -> Option<DateTime<Utc>> {
        self.schedule_next().await
    }

    /// Enable or disable background refresh
    pub async fn set_enabled(&self, enabled: bool) -> Option<DateTime<Utc>> {
        self.settings.set_enabled(enabled).await;
        tracing::info!(
            "Background refresh {}",
            if enabled { "enabled" } else { "disabled" }
        );
        self.schedule_next().await
    }

    /// Cancel the pending job and submit a new one for the planned time.
    ///
    /// Returns the submitted start time, or `None` when refresh is disabled
    /// or the host rejected the request.
    pub async fn schedule_next(&self) -> Option<DateTime<Utc>> {
        let _guard = self.scheduling.lock().await;

        let previous = self.inner.lock().pending.take();
        if let Some(previous) = previous {
            self.jobs.cancel(previous.handle);
            tracing::debug!("Replaced pending refresh {}", previous.handle);
        }

        if !self.settings.enabled() {
            tracing::info!("Background refresh disabled, nothing scheduled");
            self.set_state(SchedulerState::Idle);
            return None;
        }

        let now = self.clock.now();
        let patterns = self.usage.patterns(now).await;
        let plan = self
            .planner
            .plan(&patterns, now, self.settings.last_completed_refresh());
        log_plan(&plan);

        let request = JobRequest {
            job_id: REFRESH_JOB_ID.to_string(),
            earliest_start: plan.at,
        };
        match self.jobs.submit(request) {
            Ok(handle) => {
                let mut inner = self.inner.lock();
                inner.pending = Some(PendingJob {
                    handle,
                    at: plan.at,
                });
                inner.state = SchedulerState::Scheduled;
                Some(plan.at)
            }
            Err(e) => {
                tracing::warn!("Background refresh not scheduled: {}", e);
                self.set_state(SchedulerState::Idle);
                None
            }
        }
    }

    /// Run the refresh job, then plan the next one
    pub async fn execute(&self, ctx: JobContext) -> JobOutcome {
        {
            let mut inner = self.inner.lock();
            if inner.pending.is_some_and(|p| p.handle == ctx.handle) {
                inner.pending = None;
            }
            inner.state = SchedulerState::Executing;
        }

        let outcome = self.refresh(&ctx).await;
        match outcome {
            JobOutcome::Completed => tracing::info!("Background refresh completed"),
            JobOutcome::Failed => tracing::info!("Background refresh did not complete"),
            JobOutcome::Expired => tracing::warn!("Background refresh expired"),
        }

        self.schedule_next().await;
        outcome
    }

    async fn refresh(&self, ctx: &JobContext) -> JobOutcome {
        let Some(location) = self.weather.location_store().read().await else {
            tracing::info!("No last known location, nothing to refresh");
            return JobOutcome::Failed;
        };

        let fetch = self
            .weather
            .refresh(location.coordinate(), &location.display_name);
        tokio::select! {
            result = fetch => match result {
                Ok(_) => {
                    self.settings.record_completion(self.clock.now()).await;
                    JobOutcome::Completed
                }
                Err(e) => {
                    tracing::warn!("Background fetch for {} failed: {}", location.display_name, e);
                    JobOutcome::Failed
                }
            },
            _ = ctx.expired() => JobOutcome::Expired,
        }
    }

    fn set_state(&self, state: SchedulerState) {
        self.inner.lock().state = state;
    }
}

fn log_plan(plan: &RefreshPlan) {
    match plan.window {
        Some(window) => tracing::info!(
            "Next refresh at {} for the {:02}:00 window (confidence {:.2})",
            plan.at,
            window.hour,
            window.confidence
        ),
        None => tracing::info!("Next refresh at {} (no confident window)", plan.at),
    }
}

#[async_trait]
impl JobHandler for RefreshScheduler {
    async fn run(&self, ctx: JobContext) -> JobOutcome {
        self.execute(ctx).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
    use stratus_core::{Config, ManualClock, SchedulerError};
    use stratus_weather::{
        CacheLimits, CacheStore, Coordinate, CurrentWeather, PowerState, SharedLocationStore,
        WeatherCondition, WeatherData, WeatherError, WeatherFetcher,
    };
    use tempfile::TempDir;

    /// Job host that records requests instead of running them
    #[derive(Default)]
    struct FakeJobs {
        next: AtomicU64,
        submitted: Mutex<Vec<(JobHandle, JobRequest)>>,
        cancelled: Mutex<Vec<JobHandle>>,
        registered: Mutex<Vec<String>>,
        reject: AtomicBool,
    }

    impl FakeJobs {
        fn pending(&self) -> Vec<JobHandle> {
            let cancelled = self.cancelled.lock();
            self.submitted
                .lock()
                .iter()
                .map(|(h, _)| *h)
                .filter(|h| !cancelled.contains(h))
                .collect()
        }

        fn last_request(&self) -> JobRequest {
            self.submitted.lock().last().unwrap().1.clone()
        }
    }

    impl JobScheduler for FakeJobs {
        fn register(&self, job_id: &str, _handler: Weak<dyn JobHandler>) {
            self.registered.lock().push(job_id.to_string());
        }

        fn submit(&self, request: JobRequest) -> Result<JobHandle, SchedulerError> {
            if self.reject.load(Ordering::SeqCst) {
                return Err(SchedulerError::Rejected("quota".to_string()));
            }
            let handle = JobHandle::from_raw(self.next.fetch_add(1, Ordering::SeqCst));
            self.submitted.lock().push((handle, request));
            Ok(handle)
        }

        fn cancel(&self, handle: JobHandle) {
            self.cancelled.lock().push(handle);
        }
    }

    #[derive(Default)]
    struct FakeFetcher {
        calls: AtomicU32,
        failing: AtomicBool,
        hang: AtomicBool,
    }

    #[async_trait]
    impl WeatherFetcher for FakeFetcher {
        async fn fetch(
            &self,
            coordinate: Coordinate,
            _force_refresh: bool,
        ) -> Result<WeatherData, WeatherError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(WeatherError::Api { status: 502 });
            }
            Ok(WeatherData {
                coordinate,
                current: CurrentWeather {
                    temperature: 12.0,
                    feels_like: 11.0,
                    humidity: 70,
                    wind_speed: 4.0,
                    condition: WeatherCondition::Cloudy,
                },
                daily: Vec::new(),
                fetched_at: Utc::now(),
            })
        }
    }

    struct Fixture {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        jobs: Arc<FakeJobs>,
        fetcher: Arc<FakeFetcher>,
        weather: Arc<WeatherService>,
        scheduler: Arc<RefreshScheduler>,
    }

    // 2026-04-06 is a Monday
    fn monday_at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 6, hour, minute, 0).unwrap()
    }

    async fn fixture_with(enabled: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(monday_at(6, 0)));

        let mut config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        config.refresh.enabled = enabled;
        config.refresh.utc_offset_minutes = Some(0);
        let app = App::with_config(config, clock.clone()).unwrap();

        let cache = Arc::new(
            CacheStore::open(
                app.config().cache_dir(),
                CacheLimits::from(&app.config().cache),
                app.clock(),
                Arc::new(PowerState::default()),
            )
            .await,
        );
        let location = Arc::new(SharedLocationStore::new(
            &app.config().shared_dir(),
            app.clock(),
        ));
        let fetcher = Arc::new(FakeFetcher::default());
        let weather = Arc::new(WeatherService::new(fetcher.clone(), cache, location));
        let jobs = Arc::new(FakeJobs::default());
        let scheduler = RefreshScheduler::open(&app, weather.clone(), jobs.clone()).await;

        Fixture {
            _dir: dir,
            clock,
            jobs,
            fetcher,
            weather,
            scheduler,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(true).await
    }

    async fn remember_location(fx: &Fixture) {
        fx.weather
            .location_store()
            .write(37.7749, -122.4194, "San Francisco")
            .await
            .unwrap();
    }

    fn context(fx: &Fixture) -> JobContext {
        let (handle, _) = fx.scheduler.pending_job().unwrap();
        JobContext::new(handle, REFRESH_JOB_ID)
    }

    #[tokio::test]
    async fn registers_refresh_handler() {
        let fx = fixture().await;
        assert_eq!(*fx.jobs.registered.lock(), vec![REFRESH_JOB_ID.to_string()]);
        assert_eq!(fx.scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn no_usage_falls_back_two_hours() {
        let fx = fixture().await;
        let at = fx.scheduler.on_background().await.unwrap();

        assert_eq!(at, monday_at(8, 0));
        assert_eq!(fx.jobs.last_request().earliest_start, monday_at(8, 0));
        assert_eq!(fx.jobs.last_request().job_id, REFRESH_JOB_ID);
        assert_eq!(fx.scheduler.state(), SchedulerState::Scheduled);
    }

    #[tokio::test]
    async fn only_one_job_pending() {
        let fx = fixture().await;
        fx.scheduler.on_background().await.unwrap();
        fx.clock.advance(Duration::minutes(1));
        fx.scheduler.on_background().await.unwrap();
        fx.scheduler.on_background().await.unwrap();

        assert_eq!(fx.jobs.submitted.lock().len(), 3);
        assert_eq!(fx.jobs.cancelled.lock().len(), 2);
        let pending = fx.jobs.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(fx.scheduler.pending_job().unwrap().0, pending[0]);
    }

    #[tokio::test]
    async fn foreground_events_merge_into_one_bucket() {
        let fx = fixture().await;
        fx.clock.set(monday_at(8, 5));
        fx.scheduler.on_foreground().await;
        assert_eq!(fx.scheduler.state(), SchedulerState::Learning);

        fx.clock.set(monday_at(8, 50));
        fx.scheduler.on_foreground().await;

        let patterns = fx.scheduler.usage_patterns().await;
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].frequency, 2);
        assert_eq!(patterns[0].hour_of_day, 8);
    }

    #[tokio::test]
    async fn learned_hour_schedules_quarter_before() {
        let fx = fixture().await;

        // Opened around 8 on the previous three days
        for day in 1..=3 {
            fx.clock.set(monday_at(8, 10) - Duration::days(day));
            fx.scheduler.on_foreground().await;
        }

        fx.clock.set(monday_at(6, 30));
        let at = fx.scheduler.on_background().await.unwrap();
        assert_eq!(at, monday_at(7, 45));

        let confidence = fx.scheduler.hourly_confidence().await;
        assert!((confidence[8] - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn successful_job_refreshes_and_reschedules() {
        let fx = fixture().await;
        remember_location(&fx).await;
        fx.scheduler.on_background().await.unwrap();
        let ctx = context(&fx);

        fx.clock.set(monday_at(8, 0));
        let outcome = fx.scheduler.execute(ctx).await;

        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(fx.fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(fx.weather.cache().get(37.7749, -122.4194).await.is_some());
        assert_eq!(
            fx.scheduler.settings().last_completed_refresh,
            Some(monday_at(8, 0))
        );

        // Next job already submitted
        assert_eq!(fx.jobs.submitted.lock().len(), 2);
        assert_eq!(fx.jobs.pending().len(), 1);
        let (_, next) = fx.scheduler.pending_job().unwrap();
        assert!(next >= monday_at(8, 30));
        assert_eq!(fx.scheduler.state(), SchedulerState::Scheduled);
    }

    #[tokio::test]
    async fn missing_location_fails_quietly_and_reschedules() {
        let fx = fixture().await;
        fx.scheduler.on_background().await.unwrap();
        let ctx = context(&fx);

        let outcome = fx.scheduler.execute(ctx).await;
        assert_eq!(outcome, JobOutcome::Failed);
        assert_eq!(fx.fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(fx.scheduler.pending_job().is_some());
        assert_eq!(fx.jobs.pending().len(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_still_reschedules() {
        let fx = fixture().await;
        remember_location(&fx).await;
        fx.fetcher.failing.store(true, Ordering::SeqCst);
        fx.scheduler.on_background().await.unwrap();
        let ctx = context(&fx);

        let outcome = fx.scheduler.execute(ctx).await;
        assert_eq!(outcome, JobOutcome::Failed);
        assert!(fx.scheduler.settings().last_completed_refresh.is_none());
        assert_eq!(fx.scheduler.state(), SchedulerState::Scheduled);
        assert_eq!(fx.jobs.submitted.lock().len(), 2);
    }

    #[tokio::test]
    async fn expiry_interrupts_fetch() {
        let fx = fixture().await;
        remember_location(&fx).await;
        fx.fetcher.hang.store(true, Ordering::SeqCst);
        fx.scheduler.on_background().await.unwrap();
        let ctx = context(&fx);

        let expiry = ctx.clone();
        let scheduler = fx.scheduler.clone();
        let task = tokio::spawn(async move { scheduler.execute(ctx).await });

        tokio::task::yield_now().await;
        expiry.expire();
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome, JobOutcome::Expired);
        assert!(fx.scheduler.pending_job().is_some());
    }

    #[tokio::test]
    async fn disabled_cancels_and_submits_nothing() {
        let fx = fixture().await;
        fx.scheduler.on_background().await.unwrap();

        assert!(fx.scheduler.set_enabled(false).await.is_none());
        assert_eq!(fx.jobs.pending().len(), 0);
        assert!(fx.scheduler.pending_job().is_none());
        assert_eq!(fx.scheduler.state(), SchedulerState::Idle);

        assert!(fx.scheduler.on_background().await.is_none());
        assert_eq!(fx.jobs.submitted.lock().len(), 1);
    }

    #[tokio::test]
    async fn disabled_by_config_never_submits() {
        let fx = fixture_with(false).await;
        assert!(fx.scheduler.on_background().await.is_none());
        assert!(fx.jobs.submitted.lock().is_empty());

        assert!(fx.scheduler.set_enabled(true).await.is_some());
        assert_eq!(fx.jobs.submitted.lock().len(), 1);
    }

    #[tokio::test]
    async fn rejected_submission_leaves_idle() {
        let fx = fixture().await;
        fx.jobs.reject.store(true, Ordering::SeqCst);

        assert!(fx.scheduler.on_background().await.is_none());
        assert_eq!(fx.scheduler.state(), SchedulerState::Idle);
        assert!(fx.scheduler.pending_job().is_none());
    }
}
