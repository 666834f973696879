//! Error types for E4 Relay

use thiserror::Error;

use crate::schema::DecodeError;
use crate::sinks::SinkError;

/// Errors that can occur while configuring or running the relay
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid calibration range [{in_min}, {in_max}]: {reason}")]
    InvalidCalibration {
        in_min: f64,
        in_max: f64,
        reason: &'static str,
    },

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Failed to decode event: {0}")]
    DecodeError(#[from] DecodeError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Sink error: {0}")]
    SinkError(#[from] SinkError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Server error: {0}")]
    ServerError(String),
}

impl From<figment::Error> for RelayError {
    fn from(e: figment::Error) -> Self {
        RelayError::ConfigError(e.to_string())
    }
}
