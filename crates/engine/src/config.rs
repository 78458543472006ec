//! Engine configuration

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use engine_lib::alerting::{AlertChannelTarget, ChannelKind, DeliveryConfig, MAX_SLA};
use serde::Deserialize;
use tracing::warn;

/// Environment variable naming an optional config file
pub const CONFIG_PATH_ENV: &str = "ANOMALY_CONFIG";

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Name reported in structured logs
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Port for the detection/alerting API, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// End-to-end delivery budget for one alert, in seconds
    #[serde(default = "default_sla_secs")]
    pub sla_secs: u64,

    /// Backoff unit between delivery attempts, in milliseconds
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,

    /// Notification destinations addressable by name
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// One configured notification destination
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub kind: ChannelKind,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_sla_secs() -> u64 {
    60
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            api_port: default_api_port(),
            sla_secs: default_sla_secs(),
            backoff_unit_ms: default_backoff_unit_ms(),
            channels: Vec::new(),
        }
    }
}

impl ChannelConfig {
    pub fn to_target(&self) -> AlertChannelTarget {
        let mut target = AlertChannelTarget::new(self.name.clone(), self.kind)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_max_attempts(self.max_attempts);
        target.endpoint = self.endpoint.clone();
        target
    }
}

impl EngineConfig {
    /// Load configuration from the environment and the file named by `ANOMALY_CONFIG`
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load_from(path.as_deref().map(Path::new))
    }

    /// Load configuration with an optional file layered under `ANOMALY_*` variables
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("ANOMALY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded = config
            .try_deserialize::<EngineConfig>()
            .map_err(anyhow::Error::from)
            .and_then(|c| c.validate().map(|_| c));

        Ok(loaded.unwrap_or_else(|err| {
            warn!(error = %err, "Invalid configuration, using defaults");
            EngineConfig::default()
        }))
    }

    fn validate(&self) -> Result<()> {
        if self.sla_secs == 0 || self.sla_secs > MAX_SLA.as_secs() {
            anyhow::bail!("sla_secs must be between 1 and {}", MAX_SLA.as_secs());
        }
        let mut names = HashSet::new();
        for channel in &self.channels {
            if channel.name.trim().is_empty() {
                anyhow::bail!("channel name must not be empty");
            }
            if !names.insert(channel.name.as_str()) {
                anyhow::bail!("duplicate channel name '{}'", channel.name);
            }
            if channel.max_attempts == 0 || channel.timeout_secs == 0 {
                anyhow::bail!(
                    "channel '{}' needs a positive timeout and attempt count",
                    channel.name
                );
            }
        }
        Ok(())
    }

    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            sla: Duration::from_secs(self.sla_secs),
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
        }
    }

    pub fn targets(&self) -> Vec<AlertChannelTarget> {
        self.channels.iter().map(ChannelConfig::to_target).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.delivery_config(), DeliveryConfig::default());
        assert!(config.targets().is_empty());
    }

    #[test]
    fn test_sla_bounds() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());

        config.sla_secs = u64::MAX;
        assert!(config.validate().is_err());

        config.sla_secs = 0;
        assert!(config.validate().is_err());

        config.sla_secs = MAX_SLA.as_secs();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_oversized_sla_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "sla_secs = 9223372036854775807\n").unwrap();

        let config = EngineConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.sla_secs, 60);
    }

    #[test]
    fn test_channel_target_conversion() {
        let channel = ChannelConfig {
            name: "ops".to_string(),
            kind: ChannelKind::Teams,
            endpoint: None,
            timeout_secs: 10,
            max_attempts: 5,
        };
        let target = channel.to_target();
        assert_eq!(target.timeout, Duration::from_secs(10));
        assert_eq!(target.max_attempts, 5);
        assert!(!target.is_configured());
    }
}
