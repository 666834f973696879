//! Structured logging
//!
//! Built on `tracing` and `tracing-subscriber`. Output always goes to stderr so
//! commands that print results on stdout stay machine-readable. `RUST_LOG`
//! overrides the configured level.

use crate::config::LoggingConfig;
use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored output for development
    #[default]
    Pretty,
    /// Single-line output without colors
    Compact,
    /// One JSON object per event
    Json,
}

/// Logging options resolved from configuration and CLI flags
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
    /// Colors for the pretty format
    pub with_ansi: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            with_ansi: true,
        }
    }
}

impl LogSettings {
    pub fn from_config(config: &LoggingConfig) -> Result<Self, RelayError> {
        Ok(Self {
            level: parse_log_level(&config.level)?,
            format: config.format,
            ..Default::default()
        })
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Install the global subscriber
///
/// Idempotent: when a subscriber is already installed (tests, embedding
/// applications) this returns `Ok(())`.
pub fn init(settings: LogSettings) -> Result<(), RelayError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_str().to_lowercase()));

    let layer = match settings.format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_ansi(settings.with_ansi)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_filter(env_filter)
            .boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(RelayError::ConfigError(format!(
            "Failed to initialize logging: {}",
            e
        ))),
    }
}

/// Parse a level name, case-insensitively
pub fn parse_log_level(level: &str) -> Result<Level, RelayError> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(RelayError::ConfigError(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_settings_from_config() {
        let config = LoggingConfig {
            level: "error".to_string(),
            format: LogFormat::Json,
        };
        let settings = LogSettings::from_config(&config).unwrap().with_ansi(false);

        assert_eq!(settings.level, Level::ERROR);
        assert_eq!(settings.format, LogFormat::Json);
        assert!(!settings.with_ansi);
    }

    #[test]
    fn test_init_is_idempotent() {
        let settings = LogSettings {
            format: LogFormat::Compact,
            ..Default::default()
        };
        assert!(init(settings.clone()).is_ok());
        assert!(init(settings).is_ok());
    }
}
