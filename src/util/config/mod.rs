//! Runtime configuration
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. Environment variables (JITRT_NUM_WORKERS, JITRT_LOG)
//! 2. TOML file
//! 3. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use jitrt::util::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_toml_str(
//!     r#"
//!     [scheduler]
//!     num_workers = 2
//!
//!     [log]
//!     level = "debug"
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.scheduler.num_workers, 2);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::runtime::scheduler::SchedulerConfig;
use crate::util::logger::LogLevel;

/// Environment variable overriding `scheduler.num_workers`
pub const ENV_NUM_WORKERS: &str = "JITRT_NUM_WORKERS";
/// Environment variable overriding `log.level`
pub const ENV_LOG: &str = "JITRT_LOG";

/// Top-level runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    /// Work queue settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Maximum level emitted
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
        }
    }
}

impl RuntimeConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(ConfigError::IoError)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = lookup(ENV_NUM_WORKERS) {
            self.scheduler.num_workers =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: ENV_NUM_WORKERS.to_string(),
                        value: raw.clone(),
                    })?;
        }
        if let Some(raw) = lookup(ENV_LOG) {
            self.log.level = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_LOG.to_string(),
                value: raw.clone(),
            })?;
        }
        self.validate()
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeError)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.num_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.num_workers".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    ParseError(toml::de::Error),
    SerializeError(toml::ser::Error),
    InvalidValue { key: String, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Config parse error: {}", e),
            ConfigError::SerializeError(e) => write!(f, "Config serialize error: {}", e),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "Invalid value `{}` for `{}`", value, key)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests;
