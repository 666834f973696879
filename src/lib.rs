//! E4 Relay - real-time normalization and fan-out for wearable sensor events
//!
//! The relay accepts decoded sensor reports (accelerometer, blood-volume pulse,
//! skin temperature, galvanic skin response and tag markers), rescales each
//! reading into the `[0, 1]` control range, smooths the accelerometer axes,
//! and fans every normalized reading out to two sinks:
//!
//! - a low-latency OSC stream (always), and
//! - an InfluxDB time-series record (only when recording is enabled).
//!
//! ## Modules
//!
//! - **Pipeline**: [`calibration`] → [`smoother`] → [`dispatcher`]
//! - **Boundaries**: [`schema`] (inbound JSON), [`sinks`] (OSC / InfluxDB), [`server`] (HTTP)
//! - **Ambient**: [`config`], [`logging`], [`error`]

pub mod calibration;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod schema;
pub mod server;
pub mod sinks;
pub mod smoother;
pub mod types;

pub use calibration::{rescale, CalibrationRange, CalibrationTable};
pub use config::RelayConfig;
pub use dispatcher::{DispatchMode, EventDispatcher};
pub use error::RelayError;
pub use smoother::{AccelerometerSmoother, SmootherBank, SmoothingScope, SmoothingWindow};
pub use types::{
    NormalizedReading, ReadingValue, SensorEvent, SensorKind, SensorReading, TagValue, Vector3,
};

/// Relay version reported by the CLI and the doctor report
pub const RELAY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name used in logs and reports
pub const PRODUCER_NAME: &str = "e4-relay";
