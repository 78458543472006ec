//! Per-metric threshold configuration
//!
//! Entries are created lazily from compiled defaults and replaced whole after
//! validation, so readers always see either the old or the new config.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::fatigue::FatigueThresholds;
use super::statistical::{DEFAULT_WINDOW_SIZE, DEFAULT_Z_THRESHOLD};
use crate::error::ValidationError;
use crate::models::{COST_PER_POST, ENGAGEMENT_RATE, PATTERN_USAGE_COUNT, VIRAL_COEFFICIENT};

/// Largest rolling window accepted, keeps model memory bounded
const MAX_WINDOW_SIZE: usize = 10_000;

/// Metrics that always appear in a snapshot
const KNOWN_METRICS: [&str; 4] = [
    COST_PER_POST,
    VIRAL_COEFFICIENT,
    PATTERN_USAGE_COUNT,
    ENGAGEMENT_RATE,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub metric_name: String,
    /// Expected value of the metric
    pub baseline: f64,
    /// Fraction of baseline that marks the warning tier
    pub warning_pct: f64,
    /// Multiple of baseline (or of the warning level) that marks critical
    pub critical_multiplier: f64,
    /// Rolling window of the statistical model
    pub window_size: usize,
    /// Z-score above which the statistical model reports an outlier
    pub z_threshold: f64,
    /// Fractional deviation that counts as a trend or seasonal break
    pub deviation_pct: f64,
}

impl ThresholdConfig {
    /// Compiled defaults for a metric
    pub fn defaults_for(metric_name: &str) -> Self {
        let (baseline, warning_pct, critical_multiplier) = match metric_name {
            COST_PER_POST => (0.02, 0.25, 2.0),
            VIRAL_COEFFICIENT => (1.0, 0.30, 2.0),
            // warning 0.8, critical 0.8 * 1.125 = 0.9
            PATTERN_USAGE_COUNT => (0.0, 0.80, 1.125),
            ENGAGEMENT_RATE => (0.05, 0.30, 2.0),
            _ => (0.0, 0.25, 2.0),
        };

        Self {
            metric_name: metric_name.to_string(),
            baseline,
            warning_pct,
            critical_multiplier,
            window_size: DEFAULT_WINDOW_SIZE,
            z_threshold: DEFAULT_Z_THRESHOLD,
            deviation_pct: 0.5,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.metric_name.trim().is_empty() {
            return Err(ValidationError::new("metric_name", "must not be empty"));
        }
        if !self.baseline.is_finite() || self.baseline < 0.0 {
            return Err(ValidationError::new(
                "baseline",
                "must be a finite, non-negative number",
            ));
        }
        check_fraction("warning_pct", self.warning_pct)?;
        check_fraction("deviation_pct", self.deviation_pct)?;
        if !self.critical_multiplier.is_finite() || self.critical_multiplier <= 1.0 {
            return Err(ValidationError::new(
                "critical_multiplier",
                "must be greater than 1",
            ));
        }
        if !(2..=MAX_WINDOW_SIZE).contains(&self.window_size) {
            return Err(ValidationError::new(
                "window_size",
                format!("must be between 2 and {}", MAX_WINDOW_SIZE),
            ));
        }
        if !self.z_threshold.is_finite() || self.z_threshold <= 0.0 {
            return Err(ValidationError::new("z_threshold", "must be positive"));
        }
        Ok(())
    }

    /// Config with the patch's fields overlaid; not validated
    pub fn merged(&self, patch: &ThresholdPatch) -> Self {
        Self {
            metric_name: self.metric_name.clone(),
            baseline: patch.baseline.unwrap_or(self.baseline),
            warning_pct: patch.warning_pct.unwrap_or(self.warning_pct),
            critical_multiplier: patch
                .critical_multiplier
                .unwrap_or(self.critical_multiplier),
            window_size: patch.window_size.unwrap_or(self.window_size),
            z_threshold: patch.z_threshold.unwrap_or(self.z_threshold),
            deviation_pct: patch.deviation_pct.unwrap_or(self.deviation_pct),
        }
    }

    /// Fatigue levels derived from this entry
    pub fn fatigue_thresholds(&self) -> FatigueThresholds {
        FatigueThresholds {
            warning: self.warning_pct,
            critical: (self.warning_pct * self.critical_multiplier).min(1.0),
        }
    }
}

fn check_fraction(field: &str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::new(field, "must be within [0, 1]"));
    }
    Ok(())
}

/// Partial update of a threshold entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deviation_pct: Option<f64>,
}

impl ThresholdPatch {
    pub fn is_empty(&self) -> bool {
        self == &ThresholdPatch::default()
    }
}

/// Shared, read-mostly registry of per-metric thresholds
#[derive(Debug, Default)]
pub struct ThresholdRegistry {
    entries: RwLock<HashMap<String, ThresholdConfig>>,
}

impl ThresholdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective config for a metric, falling back to compiled defaults
    pub fn get(&self, metric_name: &str) -> ThresholdConfig {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(metric_name)
            .cloned()
            .unwrap_or_else(|| ThresholdConfig::defaults_for(metric_name))
    }

    /// Validate and apply a patch to one metric
    ///
    /// On error the stored config is left untouched.
    pub fn set(
        &self,
        metric_name: &str,
        patch: &ThresholdPatch,
    ) -> Result<ThresholdConfig, ValidationError> {
        let mut applied = self.apply(&[(metric_name.to_string(), patch.clone())])?;
        applied
            .pop()
            .ok_or_else(|| ValidationError::new("metric_name", "nothing applied"))
    }

    /// Validate every patch, then apply them all under one write lock
    ///
    /// Nothing is written unless every merged entry validates.
    pub fn apply(
        &self,
        patches: &[(String, ThresholdPatch)],
    ) -> Result<Vec<ThresholdConfig>, ValidationError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let mut staged: Vec<ThresholdConfig> = Vec::with_capacity(patches.len());
        for (metric_name, patch) in patches {
            // Later patches to the same metric build on earlier staged ones
            let current = staged
                .iter()
                .rev()
                .find(|c| &c.metric_name == metric_name)
                .cloned()
                .or_else(|| entries.get(metric_name).cloned())
                .unwrap_or_else(|| ThresholdConfig::defaults_for(metric_name));
            let merged = current.merged(patch);
            merged.validate().map_err(|e| ValidationError {
                field: format!("{}.{}", metric_name, e.field),
                message: e.message,
            })?;
            staged.push(merged);
        }

        for config in &staged {
            debug!(metric = %config.metric_name, "Applying threshold update");
            entries.insert(config.metric_name.clone(), config.clone());
        }

        Ok(staged)
    }

    /// Effective config for every known or customised metric
    pub fn snapshot(&self) -> BTreeMap<String, ThresholdConfig> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot: BTreeMap<String, ThresholdConfig> = KNOWN_METRICS
            .iter()
            .map(|m| (m.to_string(), ThresholdConfig::defaults_for(m)))
            .collect();
        for (name, config) in entries.iter() {
            snapshot.insert(name.clone(), config.clone());
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        for metric in KNOWN_METRICS.iter().chain(["queue_depth"].iter()) {
            ThresholdConfig::defaults_for(metric).validate().unwrap();
        }
    }

    #[test]
    fn test_get_falls_back_to_defaults() {
        let registry = ThresholdRegistry::new();
        let cost = registry.get(COST_PER_POST);
        assert_eq!(cost.baseline, 0.02);
        assert_eq!(cost.warning_pct, 0.25);
        assert_eq!(cost.critical_multiplier, 2.0);
    }

    #[test]
    fn test_set_applies_valid_patch() {
        let registry = ThresholdRegistry::new();
        let updated = registry
            .set(
                COST_PER_POST,
                &ThresholdPatch {
                    baseline: Some(0.05),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.baseline, 0.05);
        assert_eq!(registry.get(COST_PER_POST), updated);
    }

    #[test]
    fn test_invalid_patch_leaves_config_untouched() {
        let registry = ThresholdRegistry::new();
        registry
            .set(
                COST_PER_POST,
                &ThresholdPatch {
                    baseline: Some(0.03),
                    ..Default::default()
                },
            )
            .unwrap();
        let before = registry.get(COST_PER_POST);

        let err = registry
            .set(
                COST_PER_POST,
                &ThresholdPatch {
                    baseline: Some(0.10),
                    warning_pct: Some(1.5),
                    ..Default::default()
                },
            )
            .unwrap_err();

        assert_eq!(err.field, "cost_per_post.warning_pct");
        assert_eq!(registry.get(COST_PER_POST), before);
    }

    #[test]
    fn test_multiplier_must_exceed_one() {
        let registry = ThresholdRegistry::new();
        let result = registry.set(
            VIRAL_COEFFICIENT,
            &ThresholdPatch {
                critical_multiplier: Some(1.0),
                ..Default::default()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let registry = ThresholdRegistry::new();
        let result = registry.apply(&[
            (
                COST_PER_POST.to_string(),
                ThresholdPatch {
                    baseline: Some(0.04),
                    ..Default::default()
                },
            ),
            (
                PATTERN_USAGE_COUNT.to_string(),
                ThresholdPatch {
                    warning_pct: Some(-0.1),
                    ..Default::default()
                },
            ),
        ]);

        assert!(result.is_err());
        assert_eq!(registry.get(COST_PER_POST).baseline, 0.02);
    }

    #[test]
    fn test_fatigue_thresholds_derived() {
        let thresholds = ThresholdConfig::defaults_for(PATTERN_USAGE_COUNT).fatigue_thresholds();
        assert!((thresholds.warning - 0.8).abs() < 1e-12);
        assert!((thresholds.critical - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_snapshot_lists_known_and_custom_metrics() {
        let registry = ThresholdRegistry::new();
        registry
            .set(
                "queue_depth",
                &ThresholdPatch {
                    baseline: Some(12.0),
                    ..Default::default()
                },
            )
            .unwrap();

        let snapshot = registry.snapshot();
        assert!(snapshot.contains_key(COST_PER_POST));
        assert!(snapshot.contains_key(ENGAGEMENT_RATE));
        assert_eq!(snapshot["queue_depth"].baseline, 12.0);
    }
}
