//! Content pattern fatigue tracking
//!
//! Each pattern carries a usage level that decays geometrically per elapsed
//! time bucket and grows with every reported use:
//!
//! `fatigue(t+1) = fatigue(t) * decay^(elapsed buckets) + usage_count * usage_weight`

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{DetectionModel, Deviation, ModelKind, ModelStats};
use crate::models::Severity;

/// Decay configuration for a fatigue model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FatigueConfig {
    /// Multiplier applied once per elapsed bucket
    pub decay_factor: f64,
    /// Fatigue added per reported use
    pub usage_weight: f64,
    /// Length of one decay bucket
    pub bucket: Duration,
}

impl Default for FatigueConfig {
    fn default() -> Self {
        Self {
            decay_factor: 0.95,
            usage_weight: 0.1,
            bucket: Duration::from_secs(60 * 60),
        }
    }
}

/// Levels at which a pattern counts as overused
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FatigueThresholds {
    pub warning: f64,
    pub critical: f64,
}

impl Default for FatigueThresholds {
    fn default() -> Self {
        Self {
            warning: 0.8,
            critical: 0.9,
        }
    }
}

/// Exponential-decay usage tracker for one pattern
#[derive(Debug, Clone)]
pub struct FatigueModel {
    config: FatigueConfig,
    level: f64,
    last_bucket: Option<i64>,
    uses_recorded: u64,
}

impl FatigueModel {
    pub fn new(config: FatigueConfig) -> Self {
        Self {
            config,
            level: 0.0,
            last_bucket: None,
            uses_recorded: 0,
        }
    }

    fn bucket_of(&self, at: DateTime<Utc>) -> i64 {
        let secs = self.config.bucket.as_secs().max(1) as i64;
        at.timestamp().div_euclid(secs)
    }

    fn decay_over(&self, buckets: i64) -> f64 {
        if buckets <= 0 {
            1.0
        } else {
            self.config
                .decay_factor
                .powi(buckets.min(i32::MAX as i64) as i32)
        }
    }

    /// Fatigue level as of `at`, including decay for idle buckets
    pub fn level_at(&self, at: DateTime<Utc>) -> f64 {
        match self.last_bucket {
            Some(last) => self.level * self.decay_over(self.bucket_of(at) - last),
            None => 0.0,
        }
    }

    /// Record `usage_count` uses at `at`
    pub fn record_usage(&mut self, usage_count: f64, at: DateTime<Utc>) {
        let bucket = self.bucket_of(at);
        let decayed = self.level_at(at);
        self.level = decayed + usage_count * self.config.usage_weight;
        // Late samples never rewind the decay clock
        self.last_bucket = Some(self.last_bucket.map_or(bucket, |last| last.max(bucket)));
        self.uses_recorded += 1;
    }

    pub fn is_fatigued(&self, at: DateTime<Utc>, thresholds: &FatigueThresholds) -> bool {
        self.level_at(at) >= thresholds.warning
    }

    /// Severity and confidence of the pattern's current fatigue, if any
    pub fn assess(
        &self,
        at: DateTime<Utc>,
        thresholds: &FatigueThresholds,
    ) -> Option<(Severity, f64)> {
        Self::classify(self.level_at(at), thresholds)
    }

    /// Map a fatigue level onto a severity tier
    pub fn classify(level: f64, thresholds: &FatigueThresholds) -> Option<(Severity, f64)> {
        let confidence = level.clamp(0.0, 1.0);
        if level >= thresholds.critical {
            Some((Severity::Critical, confidence))
        } else if level >= thresholds.warning {
            Some((Severity::Warning, confidence))
        } else {
            None
        }
    }
}

impl Default for FatigueModel {
    fn default() -> Self {
        Self::new(FatigueConfig::default())
    }
}

impl DetectionModel for FatigueModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Fatigue
    }

    fn add_sample(&mut self, value: f64, at: DateTime<Utc>) {
        self.record_usage(value, at);
    }

    fn score(&self, _value: f64, at: DateTime<Utc>) -> Option<Deviation> {
        self.last_bucket?;
        Some(Deviation {
            score: self.level_at(at),
            baseline: 0.0,
        })
    }

    fn reset(&mut self) {
        self.level = 0.0;
        self.last_bucket = None;
        self.uses_recorded = 0;
    }

    fn stats(&self) -> ModelStats {
        ModelStats {
            sample_count: self.uses_recorded,
            fatigue: Some(self.level_at(Utc::now())),
            ..ModelStats::default()
        }
    }
}
