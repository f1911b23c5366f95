//! Client configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config.
//!
//! ```toml
//! base_url = "ws://127.0.0.1:8080"
//! send_interval_ms = 16
//!
//! [reconnect]
//! max_attempts = 5
//! initial_delay_ms = 1000
//!
//! [watchdog]
//! silence_warning_ms = 30000
//! ```

use crate::policy::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Errors loading or validating a [`ClientConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket base URL; routes are appended to it.
    pub base_url: String,
    /// Cadence of the position stream. 16 ms is roughly 60 Hz.
    pub send_interval_ms: u64,
    /// Capacity of the game-started broadcast channel.
    pub event_capacity: usize,
    pub reconnect: ReconnectPolicy,
    pub watchdog: WatchdogConfig,
}

/// Inactivity watchdog for a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub check_interval_ms: u64,
    /// Warn when no frame arrived for this long.
    pub silence_warning_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "ws://127.0.0.1:8080".to_string(),
            send_interval_ms: 16,
            event_capacity: 16,
            reconnect: ReconnectPolicy::default(),
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 5_000,
            silence_warning_ms: 30_000,
        }
    }
}

impl WatchdogConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn silence_warning(&self) -> Duration {
        Duration::from_millis(self.silence_warning_ms)
    }
}

impl ClientConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Built without TLS, so only plain ws:// endpoints can be reached.
        if !self.base_url.starts_with("ws://") {
            return Err(ConfigError::Invalid {
                field: "base_url",
                reason: format!("expected a ws:// URL, got {:?}", self.base_url),
            });
        }
        if self.send_interval_ms == 0 {
            return Err(invalid("send_interval_ms", "must be positive"));
        }
        if self.event_capacity == 0 {
            return Err(invalid("event_capacity", "must be positive"));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(invalid("reconnect.max_attempts", "must be positive"));
        }
        if self.reconnect.multiplier.is_nan() || self.reconnect.multiplier < 1.0 {
            return Err(invalid("reconnect.multiplier", "must be at least 1.0"));
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return Err(invalid(
                "reconnect.initial_delay_ms",
                "must not exceed reconnect.max_delay_ms",
            ));
        }
        if self.watchdog.check_interval_ms == 0 {
            return Err(invalid("watchdog.check_interval_ms", "must be positive"));
        }
        Ok(())
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    /// Full URL for a route such as `/game?username=a&groupId=g`.
    pub fn endpoint(&self, route: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if route.is_empty() || route.starts_with('/') {
            format!("{}{}", base, route)
        } else {
            format!("{}/{}", base, route)
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
