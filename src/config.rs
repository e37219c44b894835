//! Container configuration.
//!
//! ```
//! use webcontainer::config::ContainerConfig;
//!
//! let config = ContainerConfig::from_json(r#"{ "port": 9000 }"#).unwrap();
//! assert_eq!(config.host, "127.0.0.1");
//! assert_eq!(config.port, 9000);
//! assert_eq!(config.idle_timeout_seconds, 5);
//! ```

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("idle timeout must be greater than zero")]
    ZeroIdleTimeout,
}

/// Recognized container options. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContainerConfig {
    /// Address to bind.
    pub host: String,
    /// Port to bind. `0` asks the OS for an ephemeral port.
    pub port: u16,
    /// Maximum silence tolerated on a connection before it is closed.
    pub idle_timeout_seconds: u64,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            idle_timeout_seconds: DEFAULT_IDLE_TIMEOUT_SECONDS,
        }
    }
}

impl ContainerConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout_seconds == 0 {
            return Err(ConfigError::ZeroIdleTimeout);
        }
        Ok(())
    }

    /// The `host:port` string handed to the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }
}
