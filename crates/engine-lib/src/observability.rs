//! Observability infrastructure for the anomaly engine
//!
//! Provides:
//! - Prometheus metrics (evaluation latency, anomalies by severity, delivery outcomes)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Histogram buckets for sample evaluation latency (in seconds)
const EVALUATION_BUCKETS: &[f64] = &[
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.05, 0.1,
];

/// Histogram buckets for alert delivery latency (in seconds)
const DELIVERY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    evaluation_latency_seconds: Histogram,
    samples_evaluated: IntCounter,
    anomalies_detected: IntCounterVec,
    deliveries: IntCounterVec,
    delivery_latency_seconds: Histogram,
    active_models: IntGauge,
    sla_misses: IntCounter,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            evaluation_latency_seconds: register_histogram!(
                "anomaly_engine_evaluation_latency_seconds",
                "Time spent evaluating one metric sample against all models",
                EVALUATION_BUCKETS.to_vec()
            )
            .expect("Failed to register evaluation_latency_seconds"),

            samples_evaluated: register_int_counter!(
                "anomaly_engine_samples_evaluated_total",
                "Total number of metric samples evaluated"
            )
            .expect("Failed to register samples_evaluated"),

            anomalies_detected: register_int_counter_vec!(
                "anomaly_engine_anomalies_detected_total",
                "Total number of anomalies detected by severity",
                &["severity"]
            )
            .expect("Failed to register anomalies_detected"),

            deliveries: register_int_counter_vec!(
                "anomaly_engine_deliveries_total",
                "Channel delivery outcomes by status",
                &["status"]
            )
            .expect("Failed to register deliveries"),

            delivery_latency_seconds: register_histogram!(
                "anomaly_engine_delivery_latency_seconds",
                "Wall time of one alert send across all channels",
                DELIVERY_BUCKETS.to_vec()
            )
            .expect("Failed to register delivery_latency_seconds"),

            active_models: register_int_gauge!(
                "anomaly_engine_active_models",
                "Number of model states currently held"
            )
            .expect("Failed to register active_models"),

            sla_misses: register_int_counter!(
                "anomaly_engine_sla_misses_total",
                "Alert sends that hit the delivery deadline"
            )
            .expect("Failed to register sla_misses"),
        }
    }
}

/// Engine metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new)
    }

    pub fn observe_evaluation_latency(&self, duration_secs: f64) {
        self.inner().evaluation_latency_seconds.observe(duration_secs);
        self.inner().samples_evaluated.inc();
    }

    pub fn inc_anomalies_detected(&self, severity: &str) {
        self.inner()
            .anomalies_detected
            .with_label_values(&[severity])
            .inc();
    }

    pub fn inc_delivery(&self, status: &str) {
        self.inner().deliveries.with_label_values(&[status]).inc();
    }

    pub fn observe_delivery_latency(&self, duration_secs: f64) {
        self.inner().delivery_latency_seconds.observe(duration_secs);
    }

    pub fn inc_sla_misses(&self) {
        self.inner().sla_misses.inc();
    }

    pub fn set_active_models(&self, count: i64) {
        self.inner().active_models.set(count);
    }
}

/// Structured logger for engine events
///
/// Consistent JSON-formatted records for anomalies, deliveries and
/// configuration changes.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log an anomaly detection event
    pub fn log_anomaly(
        &self,
        metric_name: &str,
        source: &str,
        severity: &str,
        current_value: f64,
        baseline_value: f64,
        confidence: f64,
    ) {
        match severity {
            "critical" => {
                warn!(
                    event = "anomaly_detected",
                    node = %self.node_name,
                    metric = %metric_name,
                    source = %source,
                    severity = %severity,
                    current_value = current_value,
                    baseline_value = baseline_value,
                    confidence = confidence,
                    "Critical anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "anomaly_detected",
                    node = %self.node_name,
                    metric = %metric_name,
                    source = %source,
                    severity = %severity,
                    current_value = current_value,
                    baseline_value = baseline_value,
                    confidence = confidence,
                    "Anomaly detected"
                );
            }
        }
    }

    /// Log the result of one alert send
    pub fn log_delivery(
        &self,
        alert_id: &str,
        alerts_sent: usize,
        channels: usize,
        elapsed_ms: u64,
        sla_met: bool,
    ) {
        if sla_met {
            info!(
                event = "alert_delivered",
                node = %self.node_name,
                alert_id = %alert_id,
                alerts_sent = alerts_sent,
                channels = channels,
                elapsed_ms = elapsed_ms,
                sla_met = true,
                "Alert delivery completed"
            );
        } else {
            warn!(
                event = "alert_delivered",
                node = %self.node_name,
                alert_id = %alert_id,
                alerts_sent = alerts_sent,
                channels = channels,
                elapsed_ms = elapsed_ms,
                sla_met = false,
                "Alert delivery hit the SLA deadline"
            );
        }
    }

    /// Log a threshold change
    pub fn log_threshold_update(&self, metrics: &[String]) {
        info!(
            event = "thresholds_updated",
            node = %self.node_name,
            metrics = ?metrics,
            "Threshold configuration updated"
        );
    }

    /// Log a rejected threshold change
    pub fn log_threshold_rejected(&self, reason: &str) {
        debug!(
            event = "thresholds_rejected",
            node = %self.node_name,
            reason = %reason,
            "Threshold update rejected"
        );
    }

    /// Log a model reset
    pub fn log_model_reset(&self, scopes: &[String], cleared: usize) {
        info!(
            event = "models_reset",
            node = %self.node_name,
            scopes = ?scopes,
            cleared = cleared,
            "Model state reset"
        );
    }

    /// Log engine startup
    pub fn log_startup(&self, version: &str, channels: usize) {
        info!(
            event = "engine_started",
            node = %self.node_name,
            engine_version = %version,
            channels = channels,
            "Anomaly engine started"
        );
    }

    /// Log engine shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "engine_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Anomaly engine shutting down"
        );
    }
}
