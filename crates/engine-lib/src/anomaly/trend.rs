//! Hour-of-day trend break detection
//!
//! Keeps one running average per hour of the day. A new value is compared
//! with its hour's average as it stood before the value was folded in.
//! Buckets wrap daily, so the lookback is implicitly 24 hours.

use chrono::{DateTime, Timelike, Utc};

use super::buckets::BucketedAverages;
use super::{DetectionModel, Deviation, ModelKind, ModelStats, ThresholdConfig};

/// Number of hour-of-day buckets
pub const TREND_BUCKETS: usize = 24;

/// Default fractional deviation that counts as a break
const DEFAULT_TOLERANCE: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct TrendModel {
    /// Fractional deviation from the hour's average that flags a break
    pub tolerance: f64,
    buckets: BucketedAverages,
    samples_seen: u64,
}

impl TrendModel {
    pub fn new() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            buckets: BucketedAverages::new(TREND_BUCKETS),
            samples_seen: 0,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    fn bucket_index(at: DateTime<Utc>) -> usize {
        at.hour() as usize
    }

    /// Average currently held for the hour of `at`
    pub fn hourly_average(&self, at: DateTime<Utc>) -> Option<f64> {
        self.buckets.mean(Self::bucket_index(at))
    }

    pub fn is_break(&self, value: f64, at: DateTime<Utc>) -> bool {
        self.score(value, at)
            .map(|d| d.score > self.tolerance)
            .unwrap_or(false)
    }
}

impl Default for TrendModel {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionModel for TrendModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Trend
    }

    fn add_sample(&mut self, value: f64, at: DateTime<Utc>) {
        self.buckets.update(Self::bucket_index(at), value);
        self.samples_seen += 1;
    }

    fn score(&self, value: f64, at: DateTime<Utc>) -> Option<Deviation> {
        self.buckets.deviation(Self::bucket_index(at), value)
    }

    fn reset(&mut self) {
        self.buckets.clear();
        self.samples_seen = 0;
    }

    fn stats(&self) -> ModelStats {
        ModelStats {
            sample_count: self.samples_seen,
            buckets_occupied: Some(self.buckets.occupied()),
            bucket_count: Some(self.buckets.len()),
            ..ModelStats::default()
        }
    }

    fn reconfigure(&mut self, config: &ThresholdConfig) {
        self.tolerance = config.deviation_pct;
    }
}
