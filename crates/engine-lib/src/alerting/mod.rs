//! Alert formatting and multi-channel delivery
//!
//! Handles:
//! - Rendering an alert into each channel kind's message format
//! - Concurrent delivery with per-channel retry and backoff
//! - A global deadline across all channels of one send

pub mod channel;
pub mod formatter;
pub mod manager;

pub use channel::{AlertChannel, AlertChannelTarget, WebhookChannel};
pub use formatter::{AlertFormatter, AlertPayload, ChannelKind, Presentation};
pub use manager::{
    AlertChannelManager, DeliveryConfig, DeliveryOutcome, DeliveryReport, DeliveryStatus,
    MAX_SLA,
};
