//! Logger module for jitrt
//!
//! Compact logging: `LEVEL message`, no timestamps, no targets.
//!
//! # Usage
//!
//! ```rust
//! use jitrt::util::logger;
//!
//! logger::try_init(logger::LogLevel::Info);
//! tracing::info!("Hello, {}", "world");
//! ```

use std::fmt;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

/// Level the first successful initialization installed
static INSTALLED: OnceCell<LogLevel> = OnceCell::new();

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Unknown log level name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLogLevelError(String);

impl fmt::Display for ParseLogLevelError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "unknown log level `{}`", self.0)
    }
}

impl std::error::Error for ParseLogLevelError {}

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ParseLogLevelError(s.to_string())),
        }
    }
}

/// Initialize logger with default configuration (INFO level)
pub fn init() {
    init_with_level(LogLevel::Info);
}

/// Initialize logger with custom level.
///
/// Panics if a global subscriber is already installed; see [`try_init`].
pub fn init_with_level(level: LogLevel) {
    Registry::default().with(compact_layer(level)).init();
}

/// Install the logger once per process.
///
/// Returns the level that is actually in effect: the first caller wins, and
/// later calls are no-ops. If another subscriber was installed by someone
/// else, that one is left in place.
pub fn try_init(level: LogLevel) -> LogLevel {
    *INSTALLED.get_or_init(|| {
        let _ = Registry::default().with(compact_layer(level)).try_init();
        level
    })
}

/// `LEVEL message` formatting without time, target or colors.
fn compact_layer(level: LogLevel) -> impl Layer<Registry> + Send + Sync + 'static {
    let filter = tracing_subscriber::filter::LevelFilter::from_level(level.into());
    tracing_subscriber::fmt::layer()
        .without_time()
        .with_target(false)
        .with_level(true)
        .with_ansi(false)
        .compact()
        .with_filter(filter)
}

/// Initialize logger for debug use (DEBUG level)
pub fn init_debug() {
    init_with_level(LogLevel::Debug);
}

#[cfg(test)]
mod tests;
