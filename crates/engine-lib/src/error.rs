//! Error types shared by detection and alerting

use std::time::Duration;
use thiserror::Error;

/// Rejected input: threshold update or detection sample
///
/// Raised before anything is applied, so the previous state is always intact.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Failure of a single delivery attempt to one channel
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("channel has no endpoint or credential configured")]
    Unconfigured,

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("endpoint rejected payload with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("failed to format payload: {0}")]
    Format(String),
}

impl ChannelError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ChannelError::Timeout(_) | ChannelError::Transport(_) => true,
            // Request timeout and rate limiting are transient
            ChannelError::Rejected { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            ChannelError::Unconfigured | ChannelError::Format(_) => false,
        }
    }
}

impl From<reqwest::Error> for ChannelError {
    fn from(err: reqwest::Error) -> Self {
        ChannelError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        ChannelError::Format(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ChannelError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(ChannelError::Transport("connection reset".into()).is_retryable());
        assert!(ChannelError::Rejected {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(ChannelError::Rejected {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(!ChannelError::Rejected {
            status: 400,
            body: "bad payload".into()
        }
        .is_retryable());
        assert!(!ChannelError::Unconfigured.is_retryable());
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::new("warning_pct", "must be within [0, 1]");
        assert_eq!(err.to_string(), "invalid warning_pct: must be within [0, 1]");
    }
}
