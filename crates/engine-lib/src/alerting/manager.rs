//! Concurrent alert delivery
//!
//! Every configured target gets its own task. A task makes up to
//! `max_attempts` attempts, each bounded by the target's timeout, sleeping
//! `2^attempt` backoff units between them. The send as a whole is bounded by
//! the SLA deadline: tasks still running when it passes are aborted and
//! reported as timed out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::channel::{AlertChannel, AlertChannelTarget, WebhookChannel};
use super::formatter::{AlertPayload, ChannelKind};
use crate::error::ChannelError;
use crate::observability::EngineMetrics;

/// Longest delivery budget honoured; larger values are clamped to it
pub const MAX_SLA: Duration = Duration::from_secs(24 * 60 * 60);

/// Deadline and backoff policy for one send
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeliveryConfig {
    /// End-to-end budget across all channels
    pub sla: Duration,
    /// Backoff after attempt n is `2^n` units
    pub backoff_unit: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            sla: Duration::from_secs(60),
            backoff_unit: Duration::from_secs(1),
        }
    }
}

/// Terminal state of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Success,
    Failed,
    Skipped,
    TimedOut,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Skipped => "skipped",
            DeliveryStatus::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub channel: String,
    pub kind: ChannelKind,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl DeliveryOutcome {
    fn new(target: &AlertChannelTarget, status: DeliveryStatus) -> Self {
        Self {
            channel: target.name.clone(),
            kind: target.kind,
            status,
            attempts: 0,
            elapsed: Duration::ZERO,
            error: None,
        }
    }

    fn failed(target: &AlertChannelTarget, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(target, DeliveryStatus::Failed)
        }
    }
}

/// Result of one `send`, never persisted
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub alert_id: Uuid,
    pub overall_elapsed: Duration,
    /// One outcome per target, in target order
    pub outcomes: Vec<DeliveryOutcome>,
    pub sla_met: bool,
}

impl DeliveryReport {
    /// Number of channels that accepted the alert
    pub fn alerts_sent(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == DeliveryStatus::Success)
            .count()
    }

    pub fn outcome(&self, channel: &str) -> Option<&DeliveryOutcome> {
        self.outcomes.iter().find(|o| o.channel == channel)
    }
}

/// Fans one alert out to many channels
pub struct AlertChannelManager {
    adapters: HashMap<ChannelKind, Arc<dyn AlertChannel>>,
    config: DeliveryConfig,
    metrics: EngineMetrics,
}

impl AlertChannelManager {
    /// Manager with no adapters registered
    pub fn new(config: DeliveryConfig) -> Self {
        Self {
            adapters: HashMap::new(),
            config,
            metrics: EngineMetrics::new(),
        }
    }

    /// Manager with the HTTP adapter registered for every channel kind
    pub fn with_http_adapters(config: DeliveryConfig) -> Self {
        let client = Client::new();
        ChannelKind::ALL
            .into_iter()
            .fold(Self::new(config), |manager, kind| {
                manager.with_adapter(Arc::new(WebhookChannel::with_client(kind, client.clone())))
            })
    }

    /// Register (or replace) the adapter for the adapter's kind
    pub fn with_adapter(mut self, adapter: Arc<dyn AlertChannel>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    /// Deliver `alert` to every target concurrently
    ///
    /// Always returns a report; channel failures are recorded per outcome and
    /// never fail the send.
    pub async fn send(&self, alert: &AlertPayload, targets: &[AlertChannelTarget]) -> DeliveryReport {
        let alert_id = Uuid::new_v4();
        let start = Instant::now();
        let deadline = start + self.config.sla.min(MAX_SLA);

        let mut outcomes: Vec<Option<DeliveryOutcome>> = vec![None; targets.len()];
        let mut attempt_counters: Vec<Arc<AtomicU32>> = Vec::with_capacity(targets.len());
        let mut tasks = JoinSet::new();

        for (index, target) in targets.iter().enumerate() {
            let attempts = Arc::new(AtomicU32::new(0));
            attempt_counters.push(Arc::clone(&attempts));

            if !target.is_configured() {
                debug!(
                    alert_id = %alert_id,
                    channel = %target.name,
                    kind = %target.kind,
                    "Channel not configured, skipping"
                );
                outcomes[index] = Some(DeliveryOutcome::new(target, DeliveryStatus::Skipped));
                continue;
            }

            let Some(adapter) = self.adapters.get(&target.kind).cloned() else {
                warn!(channel = %target.name, kind = %target.kind, "No adapter for channel kind");
                outcomes[index] = Some(DeliveryOutcome::failed(
                    target,
                    format!("no adapter registered for {}", target.kind),
                ));
                continue;
            };

            let payload = match adapter.format(alert) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(channel = %target.name, error = %err, "Failed to format alert");
                    outcomes[index] = Some(DeliveryOutcome::failed(target, err.to_string()));
                    continue;
                }
            };

            let target = target.clone();
            let backoff_unit = self.config.backoff_unit;
            tasks.spawn(async move {
                let outcome =
                    deliver_with_retry(adapter, &target, payload, backoff_unit, attempts).await;
                (index, outcome)
            });
        }

        let mut sla_met = true;
        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((index, outcome)))) => outcomes[index] = Some(outcome),
                Ok(Some(Err(err))) => {
                    // The slot stays empty and is reported below
                    warn!(alert_id = %alert_id, error = %err, "Delivery task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    sla_met = false;
                    tasks.abort_all();
                    break;
                }
            }
        }

        let overall_elapsed = start.elapsed();
        let outcomes: Vec<DeliveryOutcome> = outcomes
            .into_iter()
            .zip(targets)
            .zip(&attempt_counters)
            .map(|((outcome, target), attempts)| {
                outcome.unwrap_or_else(|| {
                    let attempts = attempts.load(Ordering::Relaxed);
                    if sla_met {
                        DeliveryOutcome {
                            attempts,
                            elapsed: overall_elapsed,
                            ..DeliveryOutcome::failed(target, "delivery task aborted")
                        }
                    } else {
                        DeliveryOutcome {
                            attempts,
                            elapsed: overall_elapsed,
                            error: Some(format!(
                                "still pending at the {}s delivery deadline",
                                self.config.sla.as_secs()
                            )),
                            ..DeliveryOutcome::new(target, DeliveryStatus::TimedOut)
                        }
                    }
                })
            })
            .collect();

        for outcome in &outcomes {
            self.metrics.inc_delivery(outcome.status.as_str());
        }
        self.metrics
            .observe_delivery_latency(overall_elapsed.as_secs_f64());
        if !sla_met {
            self.metrics.inc_sla_misses();
        }

        let report = DeliveryReport {
            alert_id,
            overall_elapsed,
            outcomes,
            sla_met,
        };
        info!(
            alert_id = %alert_id,
            channels = targets.len(),
            alerts_sent = report.alerts_sent(),
            elapsed_ms = overall_elapsed.as_millis() as u64,
            sla_met = sla_met,
            "Alert send finished"
        );
        report
    }
}

/// Delay after attempt number `attempt` (1-based)
fn backoff_delay(unit: Duration, attempt: u32) -> Duration {
    unit.saturating_mul(1u32 << attempt.min(16))
}

async fn deliver_with_retry(
    adapter: Arc<dyn AlertChannel>,
    target: &AlertChannelTarget,
    payload: Vec<u8>,
    backoff_unit: Duration,
    attempts: Arc<AtomicU32>,
) -> DeliveryOutcome {
    let start = Instant::now();
    let endpoint = target.endpoint.as_deref().unwrap_or_default();
    let max_attempts = target.max_attempts.max(1);
    let mut last_error: Option<ChannelError> = None;

    for attempt in 1..=max_attempts {
        attempts.store(attempt, Ordering::Relaxed);
        let result = match timeout(target.timeout, adapter.deliver(endpoint, payload.clone())).await
        {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(target.timeout)),
        };

        match result {
            Ok(()) => {
                debug!(channel = %target.name, attempt = attempt, "Alert delivered");
                return DeliveryOutcome {
                    attempts: attempt,
                    elapsed: start.elapsed(),
                    ..DeliveryOutcome::new(target, DeliveryStatus::Success)
                };
            }
            Err(err) => {
                let retry = err.is_retryable() && attempt < max_attempts;
                debug!(
                    channel = %target.name,
                    attempt = attempt,
                    error = %err,
                    retry = retry,
                    "Delivery attempt failed"
                );
                last_error = Some(err);
                if !retry {
                    break;
                }
                sleep(backoff_delay(backoff_unit, attempt)).await;
            }
        }
    }

    let error = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no attempt made".to_string());
    warn!(
        channel = %target.name,
        kind = %target.kind,
        attempts = attempts.load(Ordering::Relaxed),
        error = %error,
        "Channel delivery failed"
    );
    DeliveryOutcome {
        attempts: attempts.load(Ordering::Relaxed),
        elapsed: start.elapsed(),
        ..DeliveryOutcome::failed(target, error)
    }
}
