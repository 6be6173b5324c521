//! Picks the next background refresh time from learned usage.
//!
//! Each hour of the day is scored by summing the recency-weighted scores of
//! its usage patterns, then normalized against the best hour. Hours at or
//! above the confidence threshold become refresh windows; the refresh is
//! placed a fixed lead before the window's hour starts.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use stratus_core::RefreshConfig;

use crate::usage::UsagePattern;

pub const HOURS_PER_DAY: usize = 24;

/// Normalized confidence per local hour of day
pub type HourlyConfidence = [f64; HOURS_PER_DAY];

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub confidence_threshold: f64,
    pub lead: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub fallback_delay: Duration,
    pub sample_window: Duration,
}

impl From<&RefreshConfig> for PlannerConfig {
    fn from(config: &RefreshConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            lead: config.lead(),
            min_interval: config.min_interval(),
            max_interval: config.max_interval(),
            fallback_delay: config.fallback_delay(),
            sample_window: config.sample_window(),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self::from(&RefreshConfig::default())
    }
}

/// An hour of the day likely to see the app opened
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshWindow {
    pub hour: u8,
    pub confidence: f64,
}

/// When to refresh next, and which window (if any) justified it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshPlan {
    pub at: DateTime<Utc>,
    pub window: Option<RefreshWindow>,
}

/// Sum of recency-weighted scores per hour, across all days of the week
pub fn hourly_scores(
    patterns: &[UsagePattern],
    now: DateTime<Utc>,
    window: Duration,
) -> HourlyConfidence {
    let mut scores = [0.0; HOURS_PER_DAY];
    for pattern in patterns {
        if let Some(slot) = scores.get_mut(usize::from(pattern.hour_of_day)) {
            *slot += pattern.recency_weighted_score(now, window);
        }
    }
    scores
}

/// Scores divided by the best hour's score; all zero when there is no signal
pub fn normalize(scores: &HourlyConfidence) -> HourlyConfidence {
    let max = scores.iter().copied().fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return [0.0; HOURS_PER_DAY];
    }
    let mut normalized = *scores;
    for score in &mut normalized {
        *score /= max;
    }
    normalized
}

/// Hours at or above `threshold`, most confident first
pub fn optimal_windows(confidence: &HourlyConfidence, threshold: f64) -> Vec<RefreshWindow> {
    let mut windows: Vec<RefreshWindow> = confidence
        .iter()
        .enumerate()
        .filter(|(_, c)| **c > 0.0 && **c >= threshold)
        .map(|(hour, c)| RefreshWindow {
            hour: hour as u8,
            confidence: *c,
        })
        .collect();
    windows.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.hour.cmp(&b.hour))
    });
    windows
}

pub struct RefreshPlanner {
    config: PlannerConfig,
    offset: FixedOffset,
}

impl RefreshPlanner {
    pub fn new(config: PlannerConfig, offset: FixedOffset) -> Self {
        Self { config, offset }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn confidence(&self, patterns: &[UsagePattern], now: DateTime<Utc>) -> HourlyConfidence {
        normalize(&hourly_scores(patterns, now, self.config.sample_window))
    }

    /// Plan the next refresh from raw usage patterns
    pub fn plan(
        &self,
        patterns: &[UsagePattern],
        now: DateTime<Utc>,
        last_completed: Option<DateTime<Utc>>,
    ) -> RefreshPlan {
        self.plan_with_confidence(&self.confidence(patterns, now), now, last_completed)
    }

    /// Plan the next refresh from an hourly confidence distribution.
    ///
    /// The first window (by confidence) whose refresh time lies in the future
    /// and at least the minimum interval after the last completed refresh
    /// wins. Without one, the fallback delay applies, capped at the maximum
    /// interval.
    pub fn plan_with_confidence(
        &self,
        confidence: &HourlyConfidence,
        now: DateTime<Utc>,
        last_completed: Option<DateTime<Utc>>,
    ) -> RefreshPlan {
        let earliest = last_completed.map(|t| t + self.config.min_interval);

        for window in optimal_windows(confidence, self.config.confidence_threshold) {
            let Some(at) = self.refresh_time_for(window.hour, now) else {
                continue;
            };
            if earliest.is_some_and(|e| at < e) {
                tracing::debug!(
                    "Window {:02}:00 too close to last refresh, skipping",
                    window.hour
                );
                continue;
            }
            return RefreshPlan {
                at,
                window: Some(window),
            };
        }

        let delay = self.config.fallback_delay.min(self.config.max_interval);
        RefreshPlan {
            at: now + delay,
            window: None,
        }
    }

    /// Next occurrence of `lead` before local `hour:00` that is after `now`
    fn refresh_time_for(&self, hour: u8, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = NaiveTime::from_hms_opt(u32::from(hour), 0, 0)?;
        let local_date = now.with_timezone(&self.offset).date_naive();
        let hour_start = self
            .offset
            .from_local_datetime(&local_date.and_time(start))
            .single()?
            .with_timezone(&Utc);

        let candidate = hour_start - self.config.lead;
        if candidate > now {
            Some(candidate)
        } else {
            Some(candidate + Duration::days(1))
        }
    }
}
