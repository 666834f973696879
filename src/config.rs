//! Relay configuration using Figment
//!
//! Configuration is loaded once at startup from:
//! 1. `config/e4-relay.toml` (optional; every key has a default)
//! 2. Environment variables prefixed with `E4_RELAY_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use e4_relay::config::RelayConfig;
//!
//! // E4_RELAY_PIPELINE__RECORD_MODE=true enables recording
//! let config = RelayConfig::load()?;
//! config.validate()?;
//! # Ok::<(), e4_relay::RelayError>(())
//! ```

use crate::error::RelayError;
use crate::logging::LogFormat;
use crate::smoother::SmoothingScope;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/e4-relay.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "E4_RELAY_";

/// Top-level relay configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub osc: OscConfig,
    #[serde(default)]
    pub influx: InfluxConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP ingest endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. `127.0.0.1:5000`
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// OSC stream destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OscConfig {
    #[serde(default = "default_osc_host")]
    pub host: String,
    #[serde(default = "default_osc_port")]
    pub port: u16,
    /// Address prefix of every message
    #[serde(default = "default_osc_prefix")]
    pub prefix: String,
}

/// InfluxDB v2 connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfluxConfig {
    #[serde(default = "default_influx_url")]
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub org: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Dispatch behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Persist readings to InfluxDB
    #[serde(default)]
    pub record_mode: bool,
    /// Suppress per-event diagnostic logs
    #[serde(default)]
    pub quiet_mode: bool,
    #[serde(default)]
    pub smoothing_scope: SmoothingScope,
    /// Answer 400 to undecodable bodies instead of the legacy 200
    #[serde(default)]
    pub strict_ingest: bool,
    /// Capacity of the queue between the HTTP handlers and the dispatch worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level filter (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

// Default value functions
fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_osc_host() -> String {
    "127.0.0.1".to_string()
}

fn default_osc_port() -> u16 {
    5005
}

fn default_osc_prefix() -> String {
    crate::dispatcher::DEFAULT_TOPIC_PREFIX.to_string()
}

fn default_influx_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_bucket() -> String {
    "e4-bucket".to_string()
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            host: default_osc_host(),
            port: default_osc_port(),
            prefix: default_osc_prefix(),
        }
    }
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: default_influx_url(),
            token: String::new(),
            org: String::new(),
            bucket: default_bucket(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            record_mode: false,
            quiet_mode: false,
            smoothing_scope: SmoothingScope::default(),
            strict_ingest: false,
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> Result<Self, RelayError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path; a missing file yields defaults
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, RelayError> {
        let config = Self::figment(path.as_ref()).extract()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(RelayConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Parsed listen address
    pub fn bind_addr(&self) -> Result<SocketAddr, RelayError> {
        self.server.bind.parse().map_err(|e| {
            RelayError::ConfigError(format!("Invalid server.bind '{}': {}", self.server.bind, e))
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), RelayError> {
        self.bind_addr()?;

        if self.osc.host.trim().is_empty() {
            return Err(RelayError::ConfigError("osc.host must not be empty".to_string()));
        }
        if self.osc.port == 0 {
            return Err(RelayError::ConfigError("osc.port must not be 0".to_string()));
        }
        if !self.osc.prefix.starts_with('/') {
            return Err(RelayError::ConfigError(format!(
                "osc.prefix '{}' must start with '/'",
                self.osc.prefix
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(RelayError::ConfigError(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if self.pipeline.queue_capacity == 0 {
            return Err(RelayError::ConfigError(
                "pipeline.queue_capacity must be at least 1".to_string(),
            ));
        }

        if self.pipeline.record_mode {
            let required = [
                ("influx.url", &self.influx.url),
                ("influx.token", &self.influx.token),
                ("influx.org", &self.influx.org),
                ("influx.bucket", &self.influx.bucket),
            ];
            if let Some((key, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
                return Err(RelayError::ConfigError(format!(
                    "{} is required when pipeline.record_mode is enabled",
                    key
                )));
            }
        }

        Ok(())
    }
}
