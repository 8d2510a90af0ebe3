//! Agent configuration from environment variables
//!
//! - `AGENT_HEALTH_PORT` - port for health and metrics endpoints (default: 8080)
//! - `AGENT_SHUTDOWN_TIMEOUT_SECS` - deadline for the whole shutdown (default: 30)
//! - `AGENT_LOG_LEVEL` - fallback log filter when `RUST_LOG` is unset (default: info)

use std::time::Duration;

use thiserror::Error;

/// Default port for health endpoints (HTTP)
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub health_port: u16,
    pub shutdown_timeout: Duration,
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            health_port: DEFAULT_HEALTH_PORT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            log_level: "info".to_string(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("AGENT_HEALTH_PORT") {
            config.health_port = value
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| invalid("AGENT_HEALTH_PORT", &value, e))?;
        }

        if let Some(value) = lookup("AGENT_SHUTDOWN_TIMEOUT_SECS") {
            let secs: u64 = value.trim().parse().map_err(|e: std::num::ParseIntError| {
                invalid("AGENT_SHUTDOWN_TIMEOUT_SECS", &value, e)
            })?;
            if secs == 0 {
                return Err(invalid(
                    "AGENT_SHUTDOWN_TIMEOUT_SECS",
                    &value,
                    "must be greater than zero",
                ));
            }
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        if let Some(value) = lookup("AGENT_LOG_LEVEL") {
            let value = value.trim();
            if !value.is_empty() {
                config.log_level = value.to_string();
            }
        }

        Ok(config)
    }
}

fn invalid(var: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
