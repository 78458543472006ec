//! HTTP API for detection, alerting, thresholds, health and Prometheus metrics

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use engine_lib::{
    alerting::{AlertChannelManager, AlertChannelTarget, AlertPayload, ChannelKind},
    anomaly::{AnomalyDetector, ModelScope, ThresholdPatch, ThresholdRegistry},
    health::{components, ComponentStatus, HealthRegistry},
    models::{
        AnomalyEvent, MetricSample, COST_PER_POST, ENGAGEMENT_RATE, PATTERN_USAGE_COUNT,
        VIRAL_COEFFICIENT,
    },
    observability::StructuredLogger,
    ValidationError,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::EngineConfig;

/// Shared application state
pub struct AppState {
    pub detector: AnomalyDetector,
    pub alerts: AlertChannelManager,
    /// Configured destinations, addressed by name
    pub targets: Vec<AlertChannelTarget>,
    pub health_registry: HealthRegistry,
    pub logger: StructuredLogger,
}

impl AppState {
    pub fn new(
        detector: AnomalyDetector,
        alerts: AlertChannelManager,
        targets: Vec<AlertChannelTarget>,
        health_registry: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            detector,
            alerts,
            targets,
            health_registry,
            logger,
        }
    }

    /// State wired from configuration, with HTTP adapters for every channel kind
    pub fn from_config(config: &EngineConfig, health_registry: HealthRegistry) -> Self {
        Self::new(
            AnomalyDetector::new(Arc::new(ThresholdRegistry::new())),
            AlertChannelManager::with_http_adapters(config.delivery_config()),
            config.targets(),
            health_registry,
            StructuredLogger::new(&config.node_name),
        )
    }

    /// Resolve requested channel names; unknown names resolve to an unconfigured target
    fn resolve_targets(&self, names: &[String]) -> Vec<AlertChannelTarget> {
        let mut seen = HashSet::new();
        names
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .map(|name| {
                self.targets
                    .iter()
                    .find(|t| &t.name == name)
                    .cloned()
                    .unwrap_or_else(|| AlertChannelTarget::new(name.clone(), ChannelKind::Webhook))
            })
            .collect()
    }
}

/// Errors surfaced to API callers
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = match &self {
            ApiError::Validation(_) => "validation_error",
            ApiError::BadRequest(_) => "bad_request",
        };
        let message = self.to_string();
        warn!(error = error, message = %message, "Rejected request");
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: error.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

// Detection

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectRequest {
    pub cost_per_post: Option<f64>,
    pub viral_coefficient: Option<f64>,
    pub pattern_usage_count: Option<f64>,
    pub pattern_name: Option<String>,
    pub engagement_rate: Option<f64>,
    pub entity_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl DetectRequest {
    /// One sample per supplied metric, all validated before any is evaluated
    fn into_samples(self) -> Result<Vec<MetricSample>, ValidationError> {
        let timestamp = self.timestamp.unwrap_or_else(Utc::now);
        let mut samples = Vec::new();

        for (name, value) in [
            (COST_PER_POST, self.cost_per_post),
            (VIRAL_COEFFICIENT, self.viral_coefficient),
            (ENGAGEMENT_RATE, self.engagement_rate),
        ] {
            if let Some(value) = value {
                let mut sample = MetricSample::new(name, value, timestamp);
                sample.entity_id = self.entity_id.clone();
                samples.push(sample);
            }
        }

        match (self.pattern_usage_count, self.pattern_name) {
            (Some(count), pattern) => {
                let mut sample = MetricSample::new(PATTERN_USAGE_COUNT, count, timestamp);
                sample.entity_id = pattern;
                samples.push(sample);
            }
            (None, Some(_)) => {
                return Err(ValidationError::new(
                    PATTERN_USAGE_COUNT,
                    "required when pattern_name is supplied",
                ));
            }
            (None, None) => {}
        }

        if samples.is_empty() {
            return Err(ValidationError::new("body", "no metric values supplied"));
        }
        for sample in &samples {
            sample.validate()?;
        }
        Ok(samples)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetectResponse {
    pub anomalies_detected: usize,
    pub anomalies: Vec<AnomalyEvent>,
    pub models_updated: Vec<String>,
}

async fn detect(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DetectRequest>, JsonRejection>,
) -> Result<Json<DetectResponse>, ApiError> {
    let Json(request) = body?;
    let samples = request.into_samples()?;

    let mut anomalies = Vec::new();
    let mut models_updated = Vec::new();
    for sample in &samples {
        let evaluation = state.detector.evaluate(sample)?;
        models_updated.extend(evaluation.models_updated.iter().map(|k| k.to_string()));
        anomalies.extend(evaluation.events);
    }

    for event in &anomalies {
        state.logger.log_anomaly(
            &event.metric_name,
            &event.source,
            event.severity.as_str(),
            event.current_value,
            event.baseline_value,
            event.confidence,
        );
    }

    Ok(Json(DetectResponse {
        anomalies_detected: anomalies.len(),
        anomalies,
        models_updated,
    }))
}

// Alerting

#[derive(Debug, Deserialize)]
pub struct AlertRequest {
    pub alert_data: AlertPayload,
    pub channels: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ChannelResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AlertResponse {
    pub alert_id: String,
    pub alerts_sent: usize,
    pub channel_results: BTreeMap<String, ChannelResult>,
    pub sla_met: bool,
    pub elapsed_ms: u64,
}

async fn send_alert(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AlertRequest>, JsonRejection>,
) -> Result<Json<AlertResponse>, ApiError> {
    let Json(request) = body?;
    request.alert_data.validate()?;
    if request.channels.is_empty() {
        return Err(ValidationError::new("channels", "at least one channel is required").into());
    }

    let targets = state.resolve_targets(&request.channels);
    let report = state.alerts.send(&request.alert_data, &targets).await;
    let elapsed_ms = report.overall_elapsed.as_millis() as u64;

    state
        .health_registry
        .record_delivery(report.sla_met, elapsed_ms)
        .await;
    state.logger.log_delivery(
        &report.alert_id.to_string(),
        report.alerts_sent(),
        report.outcomes.len(),
        elapsed_ms,
        report.sla_met,
    );

    let channel_results = report
        .outcomes
        .iter()
        .map(|o| {
            (
                o.channel.clone(),
                ChannelResult {
                    status: o.status.as_str().to_string(),
                    error: o.error.clone(),
                    attempts: o.attempts,
                    elapsed_ms: o.elapsed.as_millis() as u64,
                },
            )
        })
        .collect();

    Ok(Json(AlertResponse {
        alert_id: report.alert_id.to_string(),
        alerts_sent: report.alerts_sent(),
        channel_results,
        sla_met: report.sla_met,
        elapsed_ms,
    }))
}

// Thresholds

/// Threshold update: shorthand keys and/or per-metric patches
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdUpdateRequest {
    pub cost_baseline: Option<f64>,
    /// Warning percentage over the cost baseline
    pub cost_threshold: Option<f64>,
    pub viral_baseline: Option<f64>,
    /// Warning percentage below the viral baseline
    pub viral_drop_threshold: Option<f64>,
    /// Fatigue level that counts as overuse
    pub fatigue_threshold: Option<f64>,
    #[serde(default)]
    pub metrics: BTreeMap<String, ThresholdPatch>,
}

impl ThresholdUpdateRequest {
    fn into_patches(self) -> Vec<(String, ThresholdPatch)> {
        let mut patches = self.metrics;

        if let Some(v) = self.cost_baseline {
            patch_for(&mut patches, COST_PER_POST).baseline = Some(v);
        }
        if let Some(v) = self.cost_threshold {
            patch_for(&mut patches, COST_PER_POST).warning_pct = Some(v);
        }
        if let Some(v) = self.viral_baseline {
            patch_for(&mut patches, VIRAL_COEFFICIENT).baseline = Some(v);
        }
        if let Some(v) = self.viral_drop_threshold {
            patch_for(&mut patches, VIRAL_COEFFICIENT).warning_pct = Some(v);
        }
        if let Some(v) = self.fatigue_threshold {
            patch_for(&mut patches, PATTERN_USAGE_COUNT).warning_pct = Some(v);
        }

        patches.into_iter().collect()
    }
}

fn patch_for<'a>(
    patches: &'a mut BTreeMap<String, ThresholdPatch>,
    metric: &str,
) -> &'a mut ThresholdPatch {
    patches.entry(metric.to_string()).or_default()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThresholdsResponse {
    pub thresholds: BTreeMap<String, engine_lib::anomaly::ThresholdConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updated: Vec<String>,
}

async fn get_thresholds(State(state): State<Arc<AppState>>) -> Json<ThresholdsResponse> {
    Json(ThresholdsResponse {
        thresholds: state.detector.thresholds().snapshot(),
        updated: Vec::new(),
    })
}

async fn update_thresholds(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ThresholdUpdateRequest>, JsonRejection>,
) -> Result<Json<ThresholdsResponse>, ApiError> {
    let Json(request) = body?;
    let patches = request.into_patches();
    if patches.is_empty() || patches.iter().all(|(_, p)| p.is_empty()) {
        return Err(ValidationError::new("body", "no threshold fields supplied").into());
    }

    let updated = match state.detector.thresholds().apply(&patches) {
        Ok(configs) => configs,
        Err(err) => {
            state.logger.log_threshold_rejected(&err.to_string());
            return Err(err.into());
        }
    };
    let names: Vec<String> = updated.into_iter().map(|c| c.metric_name).collect();
    state.logger.log_threshold_update(&names);

    Ok(Json(ThresholdsResponse {
        thresholds: state.detector.thresholds().snapshot(),
        updated: names,
    }))
}

// Models

async fn model_stats(
    State(state): State<Arc<AppState>>,
) -> Json<engine_lib::anomaly::ModelStoreStats> {
    Json(state.detector.model_stats())
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResetRequest {
    /// Model kinds to clear, or "all"; empty clears everything
    #[serde(default)]
    pub models: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub reset: Vec<String>,
    pub cleared: usize,
}

async fn reset_models(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ResetRequest>, JsonRejection>,
) -> Result<Json<ResetResponse>, ApiError> {
    let Json(request) = body?;
    let mut scopes: Vec<ModelScope> = Vec::new();
    for name in &request.models {
        let scope = ModelScope::from_str(name)?;
        if !scopes.contains(&scope) {
            scopes.push(scope);
        }
    }
    if scopes.is_empty() || scopes.contains(&ModelScope::All) {
        scopes = vec![ModelScope::All];
    }

    let cleared: usize = scopes.iter().map(|s| state.detector.reset(*s)).sum();
    let reset: Vec<String> = scopes
        .iter()
        .map(|s| match s {
            ModelScope::All => "all".to_string(),
            ModelScope::Kind(kind) => kind.to_string(),
        })
        .collect();
    state.logger.log_model_reset(&reset, cleared);

    Ok(Json(ResetResponse { reset, cleared }))
}

// Health and metrics

/// Health check response - 200 while operational, 503 when unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %err, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/anomaly/detect", post(detect))
        .route("/anomaly/alert", post(send_alert))
        .route(
            "/anomaly/thresholds",
            get(get_thresholds).put(update_thresholds),
        )
        .route("/anomaly/models/stats", get(model_stats))
        .route("/anomaly/models/reset", post(reset_models))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Register the engine's health components
pub async fn register_components(health_registry: &HealthRegistry) {
    health_registry.register(components::DETECTOR).await;
    health_registry.register(components::ALERTING).await;
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
