//! Anomaly detection over streaming metrics
//!
//! This module provides:
//! - Rolling z-score detection (statistical model)
//! - Hour-of-day and weekly-slot break detection (trend and seasonal models)
//! - Decayed pattern overuse tracking (fatigue model)
//! - Per-metric thresholds and the detector that applies severity rules

mod buckets;
mod detector;
mod fatigue;
mod seasonal;
mod statistical;
mod store;
mod thresholds;
mod trend;

pub use detector::{classify_cost, classify_viral, AnomalyDetector, DetectorConfig, Evaluation};
pub use fatigue::{FatigueConfig, FatigueModel, FatigueThresholds};
pub use seasonal::{SeasonalModel, SEASONAL_BUCKETS};
pub use statistical::{StatisticalModel, DEFAULT_WINDOW_SIZE, DEFAULT_Z_THRESHOLD};
pub use store::{ModelStore, ModelStoreStats};
pub use thresholds::{ThresholdConfig, ThresholdPatch, ThresholdRegistry};
pub use trend::{TrendModel, TREND_BUCKETS};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ValidationError;

/// Kinds of detection model maintained per metric key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Statistical,
    Trend,
    Seasonal,
    Fatigue,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::Statistical,
        ModelKind::Trend,
        ModelKind::Seasonal,
        ModelKind::Fatigue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Statistical => "statistical",
            ModelKind::Trend => "trend",
            ModelKind::Seasonal => "seasonal",
            ModelKind::Fatigue => "fatigue",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Target of a reset request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelScope {
    All,
    Kind(ModelKind),
}

impl FromStr for ModelScope {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(ModelScope::All),
            "statistical" => Ok(ModelScope::Kind(ModelKind::Statistical)),
            "trend" => Ok(ModelScope::Kind(ModelKind::Trend)),
            "seasonal" => Ok(ModelScope::Kind(ModelKind::Seasonal)),
            "fatigue" => Ok(ModelScope::Kind(ModelKind::Fatigue)),
            other => Err(ValidationError::new(
                "models",
                format!("unknown model kind '{}'", other),
            )),
        }
    }
}

impl ModelScope {
    pub fn includes(&self, kind: ModelKind) -> bool {
        match self {
            ModelScope::All => true,
            ModelScope::Kind(k) => *k == kind,
        }
    }
}

/// Identity of one piece of model state
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelKey {
    pub kind: ModelKind,
    /// Metric name, or pattern identifier for fatigue models
    pub metric: String,
}

impl ModelKey {
    pub fn new(kind: ModelKind, metric: impl Into<String>) -> Self {
        Self {
            kind,
            metric: metric.into(),
        }
    }
}

impl std::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.metric)
    }
}

/// Deviation of a value from what a model expects
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deviation {
    /// Model-specific magnitude (z-score, fractional deviation, fatigue level)
    pub score: f64,
    /// Expected value the score was computed against
    pub baseline: f64,
}

/// Diagnostics exported by every model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    pub sample_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buckets_occupied: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatigue: Option<f64>,
}

/// Capability shared by all detection models
///
/// Memory held by an implementation must stay bounded by its window or
/// bucket count, no matter how many samples it has absorbed.
pub trait DetectionModel: Send {
    fn kind(&self) -> ModelKind;

    /// Absorb one observation
    fn add_sample(&mut self, value: f64, at: DateTime<Utc>);

    /// Score a value against current state
    ///
    /// Returns `None` when the model lacks the history to judge.
    fn score(&self, value: f64, at: DateTime<Utc>) -> Option<Deviation>;

    /// Drop all learned state
    fn reset(&mut self);

    fn stats(&self) -> ModelStats;

    /// Pick up tuning from the metric's current thresholds
    fn reconfigure(&mut self, _config: &ThresholdConfig) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_scope_parsing() {
        assert_eq!("all".parse::<ModelScope>().unwrap(), ModelScope::All);
        assert_eq!(
            "Trend".parse::<ModelScope>().unwrap(),
            ModelScope::Kind(ModelKind::Trend)
        );
        assert!("markov".parse::<ModelScope>().is_err());
    }

    #[test]
    fn test_scope_includes() {
        assert!(ModelScope::All.includes(ModelKind::Fatigue));
        assert!(ModelScope::Kind(ModelKind::Trend).includes(ModelKind::Trend));
        assert!(!ModelScope::Kind(ModelKind::Trend).includes(ModelKind::Seasonal));
    }

    #[test]
    fn test_model_key_display() {
        let key = ModelKey::new(ModelKind::Statistical, "cost_per_post");
        assert_eq!(key.to_string(), "statistical:cost_per_post");
    }
}
