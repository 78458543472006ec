//! Channel adapters
//!
//! An adapter knows how to turn an alert into bytes for its channel kind and
//! how to push those bytes to an endpoint. Retry, timeouts and the delivery
//! deadline belong to the manager, not the adapter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::formatter::{AlertFormatter, AlertPayload, ChannelKind};
use crate::error::ChannelError;

/// Default timeout for one delivery attempt
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of attempts per channel
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// One configured notification destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertChannelTarget {
    pub name: String,
    pub kind: ChannelKind,
    /// Endpoint or credential reference; `None` means the channel is not set up
    pub endpoint: Option<String>,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl AlertChannelTarget {
    pub fn new(name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            name: name.into(),
            kind,
            endpoint: None,
            timeout: DEFAULT_ATTEMPT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Whether the target has somewhere to deliver to
    pub fn is_configured(&self) -> bool {
        self.endpoint
            .as_deref()
            .map(|e| !e.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Format/deliver capability for one channel kind
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Encode the alert in this channel's wire format
    fn format(&self, alert: &AlertPayload) -> Result<Vec<u8>, ChannelError>;

    /// Push an encoded payload to `endpoint`, once
    async fn deliver(&self, endpoint: &str, payload: Vec<u8>) -> Result<(), ChannelError>;
}

/// Adapter that POSTs the rendered JSON to an HTTP endpoint
///
/// Slack, Discord and Teams incoming webhooks as well as generic webhooks all
/// accept a JSON POST; only the rendered document differs per kind.
pub struct WebhookChannel {
    kind: ChannelKind,
    client: Client,
}

impl WebhookChannel {
    pub fn new(kind: ChannelKind) -> Self {
        Self::with_client(kind, Client::new())
    }

    /// Share one connection pool across adapters
    pub fn with_client(kind: ChannelKind, client: Client) -> Self {
        Self { kind, client }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn format(&self, alert: &AlertPayload) -> Result<Vec<u8>, ChannelError> {
        Ok(serde_json::to_vec(&AlertFormatter::render(alert, self.kind))?)
    }

    async fn deliver(&self, endpoint: &str, payload: Vec<u8>) -> Result<(), ChannelError> {
        let url = Url::parse(endpoint)
            .map_err(|e| ChannelError::Format(format!("invalid endpoint '{}': {}", endpoint, e)))?;

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Rejected { status, body });
        }
        Ok(())
    }
}
