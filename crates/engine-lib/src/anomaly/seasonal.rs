//! Weekly seasonal break detection
//!
//! Same deviation logic as the trend model, keyed by (weekday, hour). Stays
//! silent until a full weekly cycle worth of samples has been observed.

use chrono::{DateTime, Datelike, Timelike, Utc};

use super::buckets::BucketedAverages;
use super::{DetectionModel, Deviation, ModelKind, ModelStats, ThresholdConfig};

/// Number of (weekday, hour) buckets
pub const SEASONAL_BUCKETS: usize = 7 * 24;

const DEFAULT_TOLERANCE: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct SeasonalModel {
    /// Fractional deviation from the slot's average that flags a break
    pub tolerance: f64,
    buckets: BucketedAverages,
    samples_seen: u64,
}

impl SeasonalModel {
    pub fn new() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            buckets: BucketedAverages::new(SEASONAL_BUCKETS),
            samples_seen: 0,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    fn bucket_index(at: DateTime<Utc>) -> usize {
        at.weekday().num_days_from_monday() as usize * 24 + at.hour() as usize
    }

    /// Whether a full weekly cycle of samples has been seen
    pub fn has_full_cycle(&self) -> bool {
        self.samples_seen >= SEASONAL_BUCKETS as u64
    }

    pub fn is_break(&self, value: f64, at: DateTime<Utc>) -> bool {
        self.score(value, at)
            .map(|d| d.score > self.tolerance)
            .unwrap_or(false)
    }
}

impl Default for SeasonalModel {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionModel for SeasonalModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Seasonal
    }

    fn add_sample(&mut self, value: f64, at: DateTime<Utc>) {
        self.buckets.update(Self::bucket_index(at), value);
        self.samples_seen += 1;
    }

    fn score(&self, value: f64, at: DateTime<Utc>) -> Option<Deviation> {
        if !self.has_full_cycle() {
            return None;
        }
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
