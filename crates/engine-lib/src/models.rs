//! Core data models for the anomaly engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ValidationError;

/// Metric name for unit cost of generated content
pub const COST_PER_POST: &str = "cost_per_post";
/// Metric name for the growth/virality coefficient
pub const VIRAL_COEFFICIENT: &str = "viral_coefficient";
/// Metric name for content-pattern reuse counts
pub const PATTERN_USAGE_COUNT: &str = "pattern_usage_count";
/// Metric name for engagement rate
pub const ENGAGEMENT_RATE: &str = "engagement_rate";

/// A single observation of one metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric_name: String,
    pub value: f64,
    /// Producing entity; for pattern metrics this is the pattern identifier
    pub entity_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(metric_name: impl Into<String>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            metric_name: metric_name.into(),
            value,
            entity_id: None,
            timestamp,
        }
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Reject samples that no model could meaningfully absorb
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.metric_name.trim().is_empty() {
            return Err(ValidationError::new("metric_name", "must not be empty"));
        }
        if !self.value.is_finite() {
            return Err(ValidationError::new(
                self.metric_name.clone(),
                "value must be a finite number",
            ));
        }
        if MetricKind::from_name(&self.metric_name) == MetricKind::PatternUsage {
            if self.value < 0.0 {
                return Err(ValidationError::new(
                    self.metric_name.clone(),
                    "usage count must not be negative",
                ));
            }
            let has_pattern = self
                .entity_id
                .as_deref()
                .map(|p| !p.trim().is_empty())
                .unwrap_or(false);
            if !has_pattern {
                return Err(ValidationError::new(
                    "pattern_name",
                    "required when reporting pattern usage",
                ));
            }
        }
        Ok(())
    }
}

/// Classification of a metric by the rules that apply to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Cost,
    ViralCoefficient,
    PatternUsage,
    EngagementRate,
    Generic,
}

impl MetricKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            COST_PER_POST => MetricKind::Cost,
            VIRAL_COEFFICIENT => MetricKind::ViralCoefficient,
            PATTERN_USAGE_COUNT => MetricKind::PatternUsage,
            ENGAGEMENT_RATE => MetricKind::EngagementRate,
            _ => MetricKind::Generic,
        }
    }
}

/// Severity tier of an anomaly or alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A sample classified as deviating from expected behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub metric_name: String,
    pub current_value: f64,
    pub baseline_value: f64,
    pub severity: Severity,
    /// Confidence score 0.0-1.0
    pub confidence: f64,
    /// Rule or model that produced the finding (e.g. "cost_threshold", "trend")
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub context: HashMap<String, serde_json::Value>,
    pub detected_at: DateTime<Utc>,
}

impl AnomalyEvent {
    /// Percentage difference from baseline (0 when the baseline is zero)
    pub fn deviation_percent(&self) -> f64 {
        if self.baseline_value.abs() < f64::EPSILON {
            return 0.0;
        }
        ((self.current_value - self.baseline_value) / self.baseline_value) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_kind_from_name() {
        assert_eq!(MetricKind::from_name("cost_per_post"), MetricKind::Cost);
        assert_eq!(
            MetricKind::from_name("viral_coefficient"),
            MetricKind::ViralCoefficient
        );
        assert_eq!(MetricKind::from_name("queue_depth"), MetricKind::Generic);
    }

    #[test]
    fn test_sample_validation() {
        let now = Utc::now();
        assert!(MetricSample::new("cost_per_post", 0.02, now).validate().is_ok());
        assert!(MetricSample::new("", 0.02, now).validate().is_err());
        assert!(MetricSample::new("cost_per_post", f64::NAN, now)
            .validate()
            .is_err());

        // Pattern usage requires a pattern identifier
        assert!(MetricSample::new(PATTERN_USAGE_COUNT, 1.0, now)
            .validate()
            .is_err());
        assert!(MetricSample::new(PATTERN_USAGE_COUNT, 1.0, now)
            .with_entity("listicle")
            .validate()
            .is_ok());
        assert!(MetricSample::new(PATTERN_USAGE_COUNT, -1.0, now)
            .with_entity("listicle")
            .validate()
            .is_err());
    }

    #[test]
    fn test_severity_ordering_and_serde() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
    }
}
