//! Channel-specific alert rendering
//!
//! Pure transform from an alert and a channel kind into the JSON document that
//! channel expects. No I/O and no clock: the same input always renders the
//! same output.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ValidationError;
use crate::models::{AnomalyEvent, Severity};

const FOOTER: &str = "anomaly-engine";

/// Message format family of a notification destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Slack,
    Discord,
    Teams,
    Webhook,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Slack,
        ChannelKind::Discord,
        ChannelKind::Teams,
        ChannelKind::Webhook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Slack => "slack",
            ChannelKind::Discord => "discord",
            ChannelKind::Teams => "teams",
            ChannelKind::Webhook => "webhook",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::new("kind", format!("unknown channel kind '{}'", s)))
    }
}

/// Alert content as submitted by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub severity: Severity,
    pub title: String,
    #[serde(default)]
    pub message: String,
    /// Extra facts shown alongside the message, in key order
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl AlertPayload {
    pub fn new(severity: Severity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            message: message.into(),
            context: BTreeMap::new(),
            timestamp: None,
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Build an alert describing a detected anomaly
    pub fn from_event(event: &AnomalyEvent) -> Self {
        let title = format!("{} anomaly on {}", event.severity, event.metric_name);
        let message = format!(
            "{} reported {:.4} against a baseline of {:.4} ({:+.1}%)",
            event.source,
            event.current_value,
            event.baseline_value,
            event.deviation_percent()
        );

        let mut context: BTreeMap<String, Value> = event
            .context
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        context.insert("metric".to_string(), json!(event.metric_name));
        context.insert("confidence".to_string(), json!(event.confidence));
        context.insert("source".to_string(), json!(event.source));
        if let Some(entity) = &event.entity_id {
            context.insert("entity_id".to_string(), json!(entity));
        }

        Self {
            severity: event.severity,
            title,
            message,
            context,
            timestamp: Some(event.detected_at),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::new("title", "must not be empty"));
        }
        Ok(())
    }
}

/// Visual treatment for a severity tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presentation {
    /// Hex colour with leading '#'
    pub color: &'static str,
    pub marker: &'static str,
    pub label: &'static str,
}

impl Presentation {
    pub fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Critical => Presentation {
                color: "#E01E5A",
                marker: "🚨",
                label: "CRITICAL",
            },
            Severity::Warning => Presentation {
                color: "#ECB22E",
                marker: "⚠️",
                label: "WARNING",
            },
            Severity::Info => Presentation {
                color: "#36C5F0",
                marker: "ℹ️",
                label: "INFO",
            },
        }
    }

    fn hex_digits(&self) -> &'static str {
        self.color.trim_start_matches('#')
    }

    /// Colour as a packed RGB integer
    pub fn color_value(&self) -> u32 {
        u32::from_str_radix(self.hex_digits(), 16).unwrap_or(0)
    }
}

fn fact_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Renders alerts into channel message formats
pub struct AlertFormatter;

impl AlertFormatter {
    pub fn render(alert: &AlertPayload, kind: ChannelKind) -> Value {
        let style = Presentation::for_severity(alert.severity);
        let heading = format!("{} [{}] {}", style.marker, style.label, alert.title);
        match kind {
            ChannelKind::Slack => Self::render_slack(alert, &style, &heading),
            ChannelKind::Discord => Self::render_discord(alert, &style, &heading),
            ChannelKind::Teams => Self::render_teams(alert, &style, &heading),
            ChannelKind::Webhook => Self::render_webhook(alert, &style),
        }
    }

    fn render_slack(alert: &AlertPayload, style: &Presentation, heading: &str) -> Value {
        let fields: Vec<Value> = alert
            .context
            .iter()
            .map(|(k, v)| json!({"title": k, "value": fact_text(v), "short": true}))
            .collect();
        let mut attachment = json!({
            "color": style.color,
            "title": heading,
            "text": alert.message,
            "fields": fields,
            "footer": FOOTER,
        });
        if let Some(ts) = alert.timestamp {
            attachment["ts"] = json!(ts.timestamp());
        }
        json!({
            "text": heading,
            "attachments": [attachment],
        })
    }

    fn render_discord(alert: &AlertPayload, style: &Presentation, heading: &str) -> Value {
        let fields: Vec<Value> = alert
            .context
            .iter()
            .map(|(k, v)| json!({"name": k, "value": fact_text(v), "inline": true}))
            .collect();
        let mut embed = json!({
            "title": heading,
            "description": alert.message,
            "color": style.color_value(),
            "fields": fields,
            "footer": {"text": FOOTER},
        });
        if let Some(ts) = alert.timestamp {
            embed["timestamp"] = json!(ts.to_rfc3339());
        }
        json!({ "embeds": [embed] })
    }

    fn render_teams(alert: &AlertPayload, style: &Presentation, heading: &str) -> Value {
        let facts: Vec<Value> = alert
            .context
            .iter()
            .map(|(k, v)| json!({"name": k, "value": fact_text(v)}))
            .collect();
        json!({
            "@type": "MessageCard",
            "@context": "https://schema.org/extensions",
            "themeColor": style.hex_digits(),
            "summary": alert.title,
            "sections": [{
                "activityTitle": heading,
                "text": alert.message,
                "facts": facts,
            }],
        })
    }

    fn render_webhook(alert: &AlertPayload, style: &Presentation) -> Value {
        let mut body = json!({
            "severity": alert.severity,
            "title": alert.title,
            "message": alert.message,
            "context": alert.context,
            "color": style.color,
            "marker": style.marker,
        });
        if let Some(ts) = alert.timestamp {
            body["timestamp"] = json!(ts.to_rfc3339());
        }
        body
    }
}
