//! Engine library for streaming anomaly detection and alerting
//!
//! This crate provides the core functionality for:
//! - Online statistical, trend, seasonal and fatigue models per metric
//! - Threshold-driven severity classification
//! - Alert formatting and concurrent multi-channel delivery
//! - Health checks and observability

pub mod alerting;
pub mod anomaly;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;

pub use error::{ChannelError, ValidationError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
