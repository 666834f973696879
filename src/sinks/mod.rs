//! Output sinks
//!
//! Every normalized reading is fanned out to a [`StreamSink`] (OSC over UDP)
//! and, when recording is enabled, a [`RecordSink`] (InfluxDB). Both are
//! best-effort: a failing sink is reported to the caller and never retried.

mod capture;
mod influx;
pub mod line_protocol;
pub mod osc;

pub use capture::{CaptureRecordSink, CaptureStreamSink, StreamMessage};
pub use influx::InfluxRecordSink;
pub use osc::{OscArg, OscStreamSink};

use crate::types::{NormalizedReading, ReadingValue, TagValue, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sink failures
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Encoding error: {0}")]
    Encode(String),
}

/// Low-latency, unacknowledged message emitter
pub trait StreamSink: Send {
    /// Emit one value at `address`
    fn send(&mut self, address: &str, value: &OscArg) -> Result<(), SinkError>;
}

/// Durable time-series writer
pub trait RecordSink: Send {
    /// Persist one record
    fn write(&mut self, record: &Record) -> Result<(), SinkError>;
}

/// Record sink used when no database is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecordSink;

impl RecordSink for NullRecordSink {
    fn write(&mut self, _record: &Record) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Field value of a persisted record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Text(String),
    Bool(bool),
}

impl From<&TagValue> for FieldValue {
    fn from(v: &TagValue) -> Self {
        match v {
            TagValue::Bool(b) => FieldValue::Bool(*b),
            TagValue::Integer(i) => FieldValue::Integer(*i),
            TagValue::Float(f) => FieldValue::Float(*f),
            TagValue::Text(s) => FieldValue::Text(s.clone()),
        }
    }
}

/// Fields of a persisted record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFields {
    /// Single `reading` field
    Reading(FieldValue),
    /// `x`, `y` and `z` fields
    Axes(Vector3),
}

/// Time-series point: measurement, `{device_id, run_tag}` tags, fields and a millisecond timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub measurement: String,
    pub device_id: String,
    pub run_tag: String,
    pub timestamp_millis: i64,
    pub fields: RecordFields,
}

impl Record {
    /// Build the record persisted for a normalized reading
    pub fn from_reading(reading: &NormalizedReading) -> Self {
        let fields = match &reading.value {
            ReadingValue::Scalar(v) => RecordFields::Reading(FieldValue::Float(*v)),
            ReadingValue::Vector3(axes) => RecordFields::Axes(*axes),
            ReadingValue::Label(label) => RecordFields::Reading(FieldValue::from(label)),
        };

        Self {
            measurement: reading.kind.as_str().to_string(),
            device_id: reading.device_id.clone(),
            run_tag: reading.run_tag.clone(),
            timestamp_millis: reading.timestamp_millis,
            fields,
        }
    }
}
