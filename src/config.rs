//! Runtime configuration, loaded from JSON. Every section has defaults,
//! so an empty object is a valid file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::bus::BusConfig;
use crate::schema::MessageId;
use crate::staleness::{DEFAULT_POLL_HZ, DEFAULT_STALE_TIMEOUT};
use crate::synthetic::SyntheticConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for snapshot consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub stale_timeout_ms: u64,
    pub poll_hz: u32,
}

impl Default for ConsumerConfig {
    #[allow(clippy::cast_possible_truncation)]
    fn default() -> Self {
        Self {
            stale_timeout_ms: DEFAULT_STALE_TIMEOUT.as_millis() as u64,
            poll_hz: DEFAULT_POLL_HZ,
        }
    }
}

impl ConsumerConfig {
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.poll_hz.max(1)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub bus: BusConfig,
    /// Fall back to the synthetic source when the bus probe fails.
    pub fallback_enabled: bool,
    pub synthetic: SyntheticConfig,
    pub consumer: ConsumerConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            fallback_enabled: true,
            synthetic: SyntheticConfig::default(),
            consumer: ConsumerConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.interface.trim().is_empty() {
            return Err(ConfigError::Invalid("bus.interface is empty".to_string()));
        }
        if self.bus.recv_timeout_ms == 0 {
            return Err(ConfigError::Invalid("bus.recv_timeout_ms must be > 0".to_string()));
        }
        for id in MessageId::ALL {
            if self.synthetic.rate_hz(id) == 0 {
                return Err(ConfigError::Invalid(format!("synthetic rate for {id} must be > 0")));
            }
        }
        if self.consumer.stale_timeout_ms == 0 {
            return Err(ConfigError::Invalid("consumer.stale_timeout_ms must be > 0".to_string()));
        }
        if self.consumer.poll_hz == 0 {
            return Err(ConfigError::Invalid("consumer.poll_hz must be > 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config = BridgeConfig::from_json("{}").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.bus.interface, "can0");
        assert_eq!(config.bus.bitrate, 500_000);
        assert_eq!(config.bus.recv_timeout(), Duration::from_millis(100));
        assert!(config.fallback_enabled);
        assert_eq!(config.synthetic.context_hz, 20);
        assert_eq!(config.consumer.stale_timeout(), Duration::from_millis(500));
        assert_eq!(config.consumer.poll_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = BridgeConfig::from_json(r#"{"bus": {"interface": "vcan0"}, "synthetic": {"seed": 9}}"#).unwrap();
        assert_eq!(config.bus.interface, "vcan0");
        assert_eq!(config.bus.bitrate, 500_000);
        assert_eq!(config.synthetic.seed, Some(9));
        assert_eq!(config.synthetic.status_hz, 50);
    }

    #[test]
    fn test_zero_rate_rejected() {
        let err = BridgeConfig::from_json(r#"{"synthetic": {"wheel_hz": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = BridgeConfig::from_json(r#"{"bus": {"recv_timeout_ms": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        assert!(matches!(BridgeConfig::from_json("{"), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("ecu-bridge-config-{}.json", std::process::id()));
        fs::write(&path, r#"{"fallback_enabled": false, "consumer": {"poll_hz": 10}}"#).unwrap();
        let config = BridgeConfig::load(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert!(!config.fallback_enabled);
        assert_eq!(config.consumer.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.consumer.stale_timeout_ms, 500);

        assert!(matches!(BridgeConfig::load(&path), Err(ConfigError::Io { .. })));
    }
}
