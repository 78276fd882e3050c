use crate::core::errors::{Result, StagehandError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Manager configuration with all tuning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Label used in log output
    pub name: String,
    /// Maximum number of submitted requests not yet finished.
    /// Also the capacity of every stage channel and of the completion channel,
    /// so a hop between workers never waits on a full channel.
    pub max_in_flight: usize,
    /// How long `shutdown` waits for in-flight requests before stopping workers
    pub drain_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            name: format!("stagehand_{}", Uuid::new_v4()),
            max_in_flight: 64,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl ManagerConfig {
    /// Create a new builder for ManagerConfig
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            return Err(StagehandError::configuration_field(
                "max_in_flight must be greater than 0",
                "max_in_flight",
            ));
        }
        if self.max_in_flight > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(StagehandError::configuration_field(
                format!(
                    "max_in_flight cannot exceed {}",
                    tokio::sync::Semaphore::MAX_PERMITS
                ),
                "max_in_flight",
            ));
        }
        if self.max_in_flight > u32::MAX as usize {
            return Err(StagehandError::configuration_field(
                "max_in_flight must fit in a u32",
                "max_in_flight",
            ));
        }
        if self.name.trim().is_empty() {
            return Err(StagehandError::configuration_field(
                "name cannot be empty",
                "name",
            ));
        }
        Ok(())
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            StagehandError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Small limits and short drain, for tests and local runs
    pub fn development() -> Self {
        Self {
            max_in_flight: 8,
            drain_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    /// Configuration for many concurrent requests
    pub fn high_throughput() -> Self {
        Self {
            max_in_flight: 4096,
            drain_timeout: Duration::from_secs(120),
            ..Default::default()
        }
    }
}

/// Builder for ManagerConfig
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ManagerConfig::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.config.max_in_flight = max;
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ManagerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ManagerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ManagerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.name.starts_with("stagehand_"));
        assert!(ManagerConfig::development().validate().is_ok());
        assert!(ManagerConfig::high_throughput().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = ManagerConfig::builder().max_in_flight(0).build().unwrap_err();
        assert!(matches!(
            err,
            StagehandError::Configuration { field: Some(ref f), .. } if f == "max_in_flight"
        ));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = ManagerConfig::from_json_str(r#"{ "name": "calc", "max_in_flight": 4 }"#)
            .unwrap();
        assert_eq!(config.name, "calc");
        assert_eq!(config.max_in_flight, 4);
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(ManagerConfig::from_json_str("not json").is_err());
        assert!(ManagerConfig::from_json_str(r#"{ "max_in_flight": 0 }"#).is_err());
    }

    #[test]
    fn test_from_missing_file() {
        let err = ManagerConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert_eq!(err.category(), "configuration");
    }
}
