//! Anomaly detector
//!
//! Routes each sample to the models owning its metric, updates them, then
//! applies the static severity rules and the model findings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use super::fatigue::{FatigueConfig, FatigueModel};
use super::{
    DetectionModel, Deviation, ModelKey, ModelKind, ModelScope, ModelStore, ModelStoreStats,
    SeasonalModel, StatisticalModel, ThresholdConfig, ThresholdRegistry, TrendModel,
};
use crate::error::ValidationError;
use crate::models::{AnomalyEvent, MetricKind, MetricSample, Severity};
use crate::observability::EngineMetrics;

/// Absorbs float rounding at tier boundaries (0.025 / 0.02 is not exactly 1.25)
const RATIO_TOLERANCE: f64 = 1e-9;

/// Confidence attached to each severity tier
const COST_CRITICAL_CONFIDENCE: f64 = 0.9;
const COST_ELEVATED_CONFIDENCE: f64 = 0.8;
const COST_WARNING_CONFIDENCE: f64 = 0.6;

const VIRAL_CRITICAL_CONFIDENCE: f64 = 0.9;
const VIRAL_WARNING_CONFIDENCE: f64 = 0.7;

/// Tuning that is not part of per-metric thresholds
#[derive(Debug, Clone, Default)]
pub struct DetectorConfig {
    pub fatigue: FatigueConfig,
}

/// Result of evaluating one sample
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub events: Vec<AnomalyEvent>,
    /// Model states touched by the sample, in update order
    pub models_updated: Vec<ModelKey>,
}

/// Orchestrates the detection models against incoming samples
pub struct AnomalyDetector {
    thresholds: Arc<ThresholdRegistry>,
    store: ModelStore,
    config: DetectorConfig,
    metrics: EngineMetrics,
}

impl AnomalyDetector {
    pub fn new(thresholds: Arc<ThresholdRegistry>) -> Self {
        Self::with_config(thresholds, DetectorConfig::default())
    }

    pub fn with_config(thresholds: Arc<ThresholdRegistry>, config: DetectorConfig) -> Self {
        Self {
            thresholds,
            store: ModelStore::new(),
            config,
            metrics: EngineMetrics::new(),
        }
    }

    pub fn thresholds(&self) -> &Arc<ThresholdRegistry> {
        &self.thresholds
    }

    /// Evaluate a sample, updating every model that owns its metric
    ///
    /// Each model is updated exactly once and scored right after, under the
    /// model's own lock.
    pub fn evaluate(&self, sample: &MetricSample) -> Result<Evaluation, ValidationError> {
        sample.validate()?;
        let start = Instant::now();

        let config = self.thresholds.get(&sample.metric_name);
        let mut evaluation = Evaluation::default();

        match MetricKind::from_name(&sample.metric_name) {
            MetricKind::PatternUsage => self.evaluate_fatigue(sample, &config, &mut evaluation),
            kind => {
                let rule = match kind {
                    MetricKind::Cost => classify_cost(sample.value, &config)
                        .map(|(sev, conf)| (sev, conf, "cost_threshold")),
                    MetricKind::ViralCoefficient => classify_viral(sample.value, &config)
                        .map(|(sev, conf)| (sev, conf, "viral_drop")),
                    _ => None,
                };
                if let Some((severity, confidence, source)) = rule {
                    let ratio = ratio_to_baseline(sample.value, config.baseline);
                    evaluation.events.push(build_event(
                        sample,
                        config.baseline,
                        severity,
                        confidence,
                        source,
                        HashMap::from([
                            ("ratio".to_string(), json!(ratio)),
                            ("warning_pct".to_string(), json!(config.warning_pct)),
                            (
                                "critical_multiplier".to_string(),
                                json!(config.critical_multiplier),
                            ),
                        ]),
                    ));
                }
                self.evaluate_models(sample, &config, &mut evaluation);
            }
        }

        self.metrics
            .observe_evaluation_latency(start.elapsed().as_secs_f64());
        self.metrics.set_active_models(self.store.len() as i64);
        for event in &evaluation.events {
            self.metrics.inc_anomalies_detected(event.severity.as_str());
        }
        debug!(
            metric = %sample.metric_name,
            value = sample.value,
            anomalies = evaluation.events.len(),
            models = evaluation.models_updated.len(),
            "Sample evaluated"
        );

        Ok(evaluation)
    }

    /// Statistical, trend and seasonal models for a numeric metric
    fn evaluate_models(
        &self,
        sample: &MetricSample,
        config: &ThresholdConfig,
        evaluation: &mut Evaluation,
    ) {
        for kind in [ModelKind::Statistical, ModelKind::Trend, ModelKind::Seasonal] {
            let key = ModelKey::new(kind, sample.metric_name.clone());
            let deviation = self.store.with_model(
                &key,
                || build_model(kind, config.window_size),
                |model| {
                    model.reconfigure(config);
                    model.add_sample(sample.value, sample.timestamp);
                    model.score(sample.value, sample.timestamp)
                },
            );
            evaluation.models_updated.push(key);

            let finding = deviation.and_then(|d| match kind {
                ModelKind::Statistical => classify_outlier(d, config),
                _ => classify_break(d, config),
            });
            if let (Some(deviation), Some((severity, confidence))) = (deviation, finding) {
                let score_field = match kind {
                    ModelKind::Statistical => "z_score",
                    _ => "deviation",
                };
                evaluation.events.push(build_event(
                    sample,
                    deviation.baseline,
                    severity,
                    confidence,
                    kind.as_str(),
                    HashMap::from([(score_field.to_string(), json!(deviation.score))]),
                ));
            }
        }
    }

    /// Fatigue model for a pattern usage sample
    fn evaluate_fatigue(
        &self,
        sample: &MetricSample,
        config: &ThresholdConfig,
        evaluation: &mut Evaluation,
    ) {
        // Validated upstream: pattern usage always carries its pattern id
        let pattern = sample.entity_id.clone().unwrap_or_default();
        let key = ModelKey::new(ModelKind::Fatigue, pattern.clone());
        let fatigue_config = self.config.fatigue;

        let level = self.store.with_model(
            &key,
            || Box::new(FatigueModel::new(fatigue_config)),
            |model| {
                model.add_sample(sample.value, sample.timestamp);
                model.score(sample.value, sample.timestamp)
            },
        );
        evaluation.models_updated.push(key);

        let thresholds = config.fatigue_thresholds();
        let Some(level) = level.map(|d| d.score) else {
            return;
        };
        if let Some((severity, confidence)) = FatigueModel::classify(level, &thresholds) {
            let mut event = build_event(
                sample,
                thresholds.warning,
                severity,
                confidence,
                "fatigue",
                HashMap::from([
                    ("pattern".to_string(), json!(pattern)),
                    ("usage_count".to_string(), json!(sample.value)),
                    ("critical_level".to_string(), json!(thresholds.critical)),
                ]),
            );
            event.current_value = level;
            evaluation.events.push(event);
        }
    }

    /// Diagnostics for every model held
    pub fn model_stats(&self) -> ModelStoreStats {
        self.store.stats()
    }

    /// Clear model state within `scope`; thresholds are never touched
    pub fn reset(&self, scope: ModelScope) -> usize {
        let cleared = self.store.reset(scope);
        self.metrics.set_active_models(self.store.len() as i64);
        info!(scope = ?scope, cleared = cleared, "Model state reset");
        cleared
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }
}

fn build_model(kind: ModelKind, window_size: usize) -> Box<dyn DetectionModel> {
    match kind {
        ModelKind::Statistical => Box::new(StatisticalModel::new(window_size)),
        ModelKind::Trend => Box::new(TrendModel::new()),
        ModelKind::Seasonal => Box::new(SeasonalModel::new()),
        ModelKind::Fatigue => Box::new(FatigueModel::default()),
    }
}

fn ratio_to_baseline(value: f64, baseline: f64) -> f64 {
    if baseline.abs() < f64::EPSILON {
        return 0.0;
    }
    value / baseline
}

fn at_least(ratio: f64, level: f64) -> bool {
    ratio >= level - RATIO_TOLERANCE
}

fn below(ratio: f64, level: f64) -> bool {
    ratio < level - RATIO_TOLERANCE
}

/// Cost tiers: 200% critical, 150% and 125% warning
pub fn classify_cost(current: f64, config: &ThresholdConfig) -> Option<(Severity, f64)> {
    if config.baseline <= 0.0 {
        return None;
    }
    let ratio = current / config.baseline;
    if at_least(ratio, config.critical_multiplier) {
        Some((Severity::Critical, COST_CRITICAL_CONFIDENCE))
    } else if at_least(ratio, 1.0 + 2.0 * config.warning_pct) {
        Some((Severity::Warning, COST_ELEVATED_CONFIDENCE))
    } else if at_least(ratio, 1.0 + config.warning_pct) {
        Some((Severity::Warning, COST_WARNING_CONFIDENCE))
    } else {
        None
    }
}

/// Viral coefficient drops: below 50% critical, below 70% warning
pub fn classify_viral(current: f64, config: &ThresholdConfig) -> Option<(Severity, f64)> {
    if config.baseline <= 0.0 {
        return None;
    }
    let ratio = current / config.baseline;
    if below(ratio, 1.0 / config.critical_multiplier) {
        Some((Severity::Critical, VIRAL_CRITICAL_CONFIDENCE))
    } else if below(ratio, 1.0 - config.warning_pct) {
        Some((Severity::Warning, VIRAL_WARNING_CONFIDENCE))
    } else {
        None
    }
}

fn classify_outlier(deviation: Deviation, config: &ThresholdConfig) -> Option<(Severity, f64)> {
    let z = deviation.score;
    if z <= config.z_threshold {
        return None;
    }
    let severity = if z >= config.z_threshold * config.critical_multiplier {
        Severity::Critical
    } else {
        Severity::Warning
    };
    Some((severity, (z / (z + config.z_threshold)).clamp(0.0, 1.0)))
}

fn classify_break(deviation: Deviation, config: &ThresholdConfig) -> Option<(Severity, f64)> {
    let score = deviation.score;
    if score <= config.deviation_pct {
        return None;
    }
    let severity = if score >= 2.0 * config.deviation_pct {
        Severity::Warning
    } else {
        Severity::Info
    };
    let confidence = if config.deviation_pct > 0.0 {
        (score / (2.0 * config.deviation_pct)).min(1.0)
    } else {
        1.0
    };
    Some((severity, confidence))
}

fn build_event(
    sample: &MetricSample,
    baseline: f64,
    severity: Severity,
    confidence: f64,
    source: &str,
    mut context: HashMap<String, serde_json::Value>,
) -> AnomalyEvent {
    context.insert(
        "sample_timestamp".to_string(),
        json!(sample.timestamp.to_rfc3339()),
    );
    AnomalyEvent {
        metric_name: sample.metric_name.clone(),
        current_value: sample.value,
        baseline_value: baseline,
        severity,
        confidence,
        source: source.to_string(),
        entity_id: sample.entity_id.clone(),
        context,
        detected_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::ThresholdPatch;
    use crate::models::{COST_PER_POST, PATTERN_USAGE_COUNT, VIRAL_COEFFICIENT};
    use chrono::{DateTime, Duration, TimeZone};

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(Arc::new(ThresholdRegistry::new()))
    }

    fn ts(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    fn cost_config(baseline: f64) -> ThresholdConfig {
        let mut config = ThresholdConfig::defaults_for(COST_PER_POST);
        config.baseline = baseline;
        config
    }

    #[test]
    fn test_cost_tiers_boundary_inclusive() {
        let config = cost_config(1.0);
        assert_eq!(classify_cost(1.0, &config), None);
        assert_eq!(classify_cost(1.24, &config), None);
        assert_eq!(
            classify_cost(1.25, &config),
            Some((Severity::Warning, 0.6))
        );
        assert_eq!(classify_cost(1.5, &config), Some((Severity::Warning, 0.8)));
        assert_eq!(classify_cost(2.0, &config), Some((Severity::Critical, 0.9)));
        assert_eq!(classify_cost(3.0, &config), Some((Severity::Critical, 0.9)));
    }

    #[test]
    fn test_cost_boundary_with_cent_baseline() {
        let config = cost_config(0.02);
        assert_eq!(
            classify_cost(0.025, &config),
            Some((Severity::Warning, 0.6))
        );
        assert_eq!(classify_cost(0.02, &config), None);
        assert_eq!(
            classify_cost(0.04, &config),
            Some((Severity::Critical, 0.9))
        );
    }

    #[test]
    fn test_viral_tiers() {
        let config = ThresholdConfig::defaults_for(VIRAL_COEFFICIENT);
        assert_eq!(classify_viral(1.0, &config), None);
        assert_eq!(classify_viral(0.7, &config), None);
        assert_eq!(
            classify_viral(0.69, &config).map(|(s, _)| s),
            Some(Severity::Warning)
        );
        assert_eq!(
            classify_viral(0.5, &config).map(|(s, _)| s),
            Some(Severity::Warning)
        );
        assert_eq!(
            classify_viral(0.49, &config).map(|(s, _)| s),
            Some(Severity::Critical)
        );
    }

    #[test]
    fn test_cost_sample_at_125_percent() {
        let detector = detector();
        let sample = MetricSample::new(COST_PER_POST, 0.025, ts(0));
        let evaluation = detector.evaluate(&sample).unwrap();

        assert_eq!(evaluation.events.len(), 1);
        let event = &evaluation.events[0];
        assert_eq!(event.severity, Severity::Warning);
        assert_eq!(event.confidence, 0.6);
        assert_eq!(event.baseline_value, 0.02);
        assert_eq!(event.source, "cost_threshold");
    }

    #[test]
    fn test_cost_sample_at_baseline_is_quiet() {
        let detector = detector();
        let evaluation = detector
            .evaluate(&MetricSample::new(COST_PER_POST, 0.02, ts(0)))
            .unwrap();
        assert!(evaluation.events.is_empty());
        assert_eq!(evaluation.models_updated.len(), 3);
    }

    #[test]
    fn test_cost_thirty_percent_over_yields_single_warning() {
        let detector = detector();
        let evaluation = detector
            .evaluate(&MetricSample::new(COST_PER_POST, 0.026, ts(0)))
            .unwrap();

        assert_eq!(evaluation.events.len(), 1);
        let event = &evaluation.events[0];
        assert_eq!(event.severity, Severity::Warning);
        assert!((0.6..=0.8).contains(&event.confidence));
    }

    #[test]
    fn test_statistical_and_trend_findings_from_one_sample() {
        let detector = detector();
        // Stable engagement at 09:00 for three weeks
        for day in 0..21 {
            let value = 0.05 + (day % 3) as f64 * 0.001;
            let sample = MetricSample::new("engagement_rate", value, ts(day * 24 + 9));
            detector.evaluate(&sample).unwrap();
        }

        let spike = MetricSample::new("engagement_rate", 0.5, ts(21 * 24 + 9));
        let evaluation = detector.evaluate(&spike).unwrap();
        let sources: Vec<&str> = evaluation.events.iter().map(|e| e.source.as_str()).collect();

        assert!(sources.contains(&"statistical"), "sources: {:?}", sources);
        assert!(sources.contains(&"trend"), "sources: {:?}", sources);
        // Only 22 samples seen: no full weekly cycle yet
        assert!(!sources.contains(&"seasonal"));
    }

    #[test]
    fn test_pattern_fatigue_events() {
        let detector = detector();
        let mut severities = Vec::new();
        for h in 0..10 {
            let sample = MetricSample::new(PATTERN_USAGE_COUNT, 3.0, ts(h)).with_entity("listicle");
            let evaluation = detector.evaluate(&sample).unwrap();
            assert_eq!(
                evaluation.models_updated,
                vec![ModelKey::new(ModelKind::Fatigue, "listicle")]
            );
            severities.extend(evaluation.events.iter().map(|e| e.severity));
        }

        // 0.3, 0.585, 0.856 (warning), 1.113 (critical)
        assert_eq!(severities[0], Severity::Warning);
        assert!(severities.contains(&Severity::Critical));
    }

    #[test]
    fn test_patterns_tracked_independently() {
        let detector = detector();
        for _ in 0..10 {
            detector
                .evaluate(&MetricSample::new(PATTERN_USAGE_COUNT, 1.0, ts(0)).with_entity("a"))
                .unwrap();
        }
        let evaluation = detector
            .evaluate(&MetricSample::new(PATTERN_USAGE_COUNT, 1.0, ts(0)).with_entity("b"))
            .unwrap();
        assert!(evaluation.events.is_empty());
    }

    #[test]
    fn test_invalid_sample_rejected() {
        let detector = detector();
        let result = detector.evaluate(&MetricSample::new(COST_PER_POST, f64::INFINITY, ts(0)));
        assert!(result.is_err());
        assert!(detector.store().is_empty());
    }

    #[test]
    fn test_threshold_update_changes_classification() {
        let detector = detector();
        detector
            .thresholds()
            .set(
                COST_PER_POST,
                &ThresholdPatch {
                    baseline: Some(0.05),
                    ..Default::default()
                },
            )
            .unwrap();

        let evaluation = detector
            .evaluate(&MetricSample::new(COST_PER_POST, 0.026, ts(0)))
            .unwrap();
        assert!(evaluation.events.is_empty());
    }

    #[test]
    fn test_reset_keeps_thresholds() {
        let detector = detector();
        detector
            .thresholds()
            .set(
                COST_PER_POST,
                &ThresholdPatch {
                    baseline: Some(0.03),
                    ..Default::default()
                },
            )
            .unwrap();
        detector
            .evaluate(&MetricSample::new(COST_PER_POST, 0.03, ts(0)))
            .unwrap();

        assert_eq!(detector.reset(ModelScope::All), 3);
        assert_eq!(detector.thresholds().get(COST_PER_POST).baseline, 0.03);
        let stats = detector.model_stats();
        assert_eq!(stats.models["statistical"][COST_PER_POST].sample_count, 0);
    }

    #[test]
    fn test_concurrent_same_key_evaluations_are_linearizable() {
        let detector = Arc::new(detector());
        let threads = 8;
        let per_thread = 10;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let detector = Arc::clone(&detector);
                std::thread::spawn(move || {
                    for i in 0..per_thread {
                        let value = (t * per_thread + i) as f64;
                        detector
                            .evaluate(&MetricSample::new("queue_depth", value, ts(0)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // 80 samples into a window of 100: every value present exactly once
        let key = ModelKey::new(ModelKind::Statistical, "queue_depth");
        let stats = detector.store().stats_for(&key).unwrap();
        assert_eq!(stats.sample_count, (threads * per_thread) as u64);
        let expected_mean = (0..threads * per_thread).sum::<usize>() as f64
            / (threads * per_thread) as f64;
        assert!((stats.mean.unwrap() - expected_mean).abs() < 1e-9);

        let trend = detector
            .store()
            .stats_for(&ModelKey::new(ModelKind::Trend, "queue_depth"))
            .unwrap();
        assert_eq!(trend.sample_count, (threads * per_thread) as u64);
    }
}
