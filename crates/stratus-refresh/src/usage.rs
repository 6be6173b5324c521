//! Foreground usage samples bucketed by local hour and day of week.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use stratus_core::record;
use tokio::sync::Mutex;

const USAGE_VERSION: u32 = 1;

/// How often the app was opened in one (hour, day-of-week) bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsagePattern {
    /// Local hour, 0-23
    pub hour_of_day: u8,
    /// Local day of week, 1 (Sunday) to 7 (Saturday)
    pub day_of_week: u8,
    pub frequency: u32,
    pub last_used_at: DateTime<Utc>,
}

impl UsagePattern {
    /// Bucket a moment by local hour and day of week
    pub fn bucket(at: DateTime<Utc>, offset: FixedOffset) -> (u8, u8) {
        let local = at.with_timezone(&offset);
        (
            local.hour() as u8,
            local.weekday().number_from_sunday() as u8,
        )
    }

    /// Frequency scaled by a linear decay that reaches zero after `window`
    pub fn recency_weighted_score(&self, now: DateTime<Utc>, window: Duration) -> f64 {
        let window_secs = window.num_seconds();
        if window_secs <= 0 {
            return 0.0;
        }
        let age_secs = (now - self.last_used_at).num_seconds().max(0);
        let decay = (1.0 - age_secs as f64 / window_secs as f64).max(0.0);
        f64::from(self.frequency) * decay
    }
}

/// Persisted list of usage patterns.
///
/// Every load-mutate-persist cycle runs under one lock so concurrent
/// lifecycle events never lose an update.
pub struct UsageStore {
    path: PathBuf,
    offset: FixedOffset,
    window: Duration,
    patterns: Mutex<Vec<UsagePattern>>,
}

impl UsageStore {
    pub async fn open(path: PathBuf, offset: FixedOffset, window: Duration) -> Self {
        let patterns: Vec<UsagePattern> = record::load_or_none(&path, USAGE_VERSION)
            .await
            .unwrap_or_default();
        tracing::debug!("Loaded {} usage patterns", patterns.len());
        Self {
            path,
            offset,
            window,
            patterns: Mutex::new(patterns),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a foreground event, merging into the existing bucket.
    ///
    /// Returns the updated pattern.
    pub async fn record(&self, at: DateTime<Utc>) -> UsagePattern {
        let (hour, day) = UsagePattern::bucket(at, self.offset);
        let mut patterns = self.patterns.lock().await;
        Self::drop_expired(&mut patterns, at, self.window);

        let updated = match patterns
            .iter_mut()
            .find(|p| p.hour_of_day == hour && p.day_of_week == day)
        {
            Some(existing) => {
                existing.frequency = existing.frequency.saturating_add(1);
                existing.last_used_at = existing.last_used_at.max(at);
                existing.clone()
            }
            None => {
                let pattern = UsagePattern {
                    hour_of_day: hour,
                    day_of_week: day,
                    frequency: 1,
                    last_used_at: at,
                };
                patterns.push(pattern.clone());
                pattern
            }
        };

        self.persist(&patterns).await;
        updated
    }

    /// Current patterns, with those outside the sample window dropped
    pub async fn patterns(&self, now: DateTime<Utc>) -> Vec<UsagePattern> {
        let mut patterns = self.patterns.lock().await;
        if Self::drop_expired(&mut patterns, now, self.window) > 0 {
            self.persist(&patterns).await;
        }
        patterns.clone()
    }

    fn drop_expired(
        patterns: &mut Vec<UsagePattern>,
        now: DateTime<Utc>,
        window: Duration,
    ) -> usize {
        let cutoff = now - window;
        let before = patterns.len();
        patterns.retain(|p| p.last_used_at >= cutoff);
        before - patterns.len()
    }

    async fn persist(&self, patterns: &[UsagePattern]) {
        if let Err(e) = record::store(&self.path, USAGE_VERSION, patterns).await {
            tracing::warn!("Failed to persist usage patterns: {}", e);
        }
    }
}
