//! Core types for the E4 Relay pipeline
//!
//! This module defines the data structures that flow through the relay:
//! the decoded [`SensorEvent`] entering the dispatcher and the
//! [`NormalizedReading`] leaving it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sensor stream identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    #[serde(rename = "acc")]
    Accelerometer,
    #[serde(rename = "bvp")]
    Bvp,
    #[serde(rename = "temp")]
    Temperature,
    #[serde(rename = "gsr")]
    Gsr,
    #[serde(rename = "tag")]
    Tag,
}

impl SensorKind {
    /// All supported sensor kinds, in wire order
    pub const ALL: [SensorKind; 5] = [
        SensorKind::Accelerometer,
        SensorKind::Bvp,
        SensorKind::Temperature,
        SensorKind::Gsr,
        SensorKind::Tag,
    ];

    /// Wire name, also used as measurement name and topic stem
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Accelerometer => "acc",
            SensorKind::Bvp => "bvp",
            SensorKind::Temperature => "temp",
            SensorKind::Gsr => "gsr",
            SensorKind::Tag => "tag",
        }
    }

    /// Parse a wire name (`acc`, `bvp`, `temp`, `gsr`, `tag`)
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three-axis sample
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Arbitrary label carried by a tag event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl TagValue {
    /// Convert a JSON value into a tag label; arrays, objects and null are not labels
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(TagValue::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(TagValue::Integer)
                .or_else(|| n.as_f64().map(TagValue::Float)),
            serde_json::Value::String(s) => Some(TagValue::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(b) => write!(f, "{}", b),
            TagValue::Integer(i) => write!(f, "{}", i),
            TagValue::Float(v) => write!(f, "{}", v),
            TagValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::Text(v.to_string())
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Integer(v)
    }
}

/// Raw reading carried by an inbound event; the variant determines the sensor kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "reading")]
pub enum SensorReading {
    /// Three-axis tilt sample
    #[serde(rename = "acc")]
    Accelerometer(Vector3),
    /// Blood-volume pulse sample
    #[serde(rename = "bvp")]
    Bvp(f64),
    /// Skin temperature sample
    #[serde(rename = "temp")]
    Temperature(f64),
    /// Galvanic skin response sample
    #[serde(rename = "gsr")]
    Gsr(f64),
    /// Label passed through untouched
    #[serde(rename = "tag")]
    Tag(TagValue),
}

impl SensorReading {
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorReading::Accelerometer(_) => SensorKind::Accelerometer,
            SensorReading::Bvp(_) => SensorKind::Bvp,
            SensorReading::Temperature(_) => SensorKind::Temperature,
            SensorReading::Gsr(_) => SensorKind::Gsr,
            SensorReading::Tag(_) => SensorKind::Tag,
        }
    }
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorReading::Accelerometer(v) => write!(f, "{} {} {}", v.x, v.y, v.z),
            SensorReading::Bvp(v) | SensorReading::Temperature(v) | SensorReading::Gsr(v) => {
                write!(f, "{}", v)
            }
            SensorReading::Tag(label) => write!(f, "{}", label),
        }
    }
}

/// Decoded inbound sensor event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorEvent {
    pub device_id: String,
    pub run_tag: String,
    pub timestamp_millis: i64,
    #[serde(flatten)]
    pub reading: SensorReading,
}

impl SensorEvent {
    pub fn new(
        device_id: impl Into<String>,
        run_tag: impl Into<String>,
        timestamp_millis: i64,
        reading: SensorReading,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            run_tag: run_tag.into(),
            timestamp_millis,
            reading,
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.reading.kind()
    }
}

/// Normalized value emitted by the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingValue {
    /// Rescaled scalar, nominally in `[0, 1]` (not clamped)
    Scalar(f64),
    /// Smoothed, rescaled accelerometer axes
    Vector3(Vector3),
    /// Tag label, unchanged
    Label(TagValue),
}

/// Outbound normalized reading (one per inbound event)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedReading {
    pub kind: SensorKind,
    pub device_id: String,
    pub run_tag: String,
    pub timestamp_millis: i64,
    pub value: ReadingValue,
}
