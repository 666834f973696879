//! Wire format of `POST /data`
//!
//! ```json
//! {"type": "acc", "device": "d1", "run": "r1", "timestamp": 1000, "x": 1.0, "y": 2.0, "z": 3.0}
//! {"type": "temp", "device": "d1", "run": "r1", "timestamp": 1000, "value": 30.5}
//! ```

use crate::types::{SensorEvent, SensorKind, SensorReading, TagValue, Vector3};
use serde::{Deserialize, Serialize};

/// Errors raised while decoding an inbound event
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed JSON body: {0}")]
    Malformed(String),

    #[error("Unknown event type: {0}")]
    UnknownType(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for field {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Inbound event exactly as posted; every field is optional on the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSensorEvent {
    /// Sensor type: `acc`, `bvp`, `temp`, `gsr` or `tag`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Device identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Run tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    /// Device timestamp in milliseconds (integer or float)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<serde_json::Number>,
    /// Scalar reading (bvp, temp, gsr) or label (tag)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Accelerometer axes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

impl RawSensorEvent {
    /// Parse a request body; the declared content type is ignored
    pub fn from_slice(body: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(body).map_err(|e| DecodeError::Malformed(e.to_string()))
    }

    /// Decode into a typed event
    ///
    /// Missing `device` and `run` decode as empty strings; the stream side
    /// does not need them and the record side omits empty tags.
    pub fn decode(&self) -> Result<SensorEvent, DecodeError> {
        let type_name = self
            .event_type
            .as_deref()
            .ok_or(DecodeError::MissingField("type"))?;
        let kind = SensorKind::from_wire(type_name)
            .ok_or_else(|| DecodeError::UnknownType(type_name.to_string()))?;

        let timestamp_millis = self.timestamp_millis()?;
        let reading = match kind {
            SensorKind::Accelerometer => SensorReading::Accelerometer(Vector3 {
                x: self.x.ok_or(DecodeError::MissingField("x"))?,
                y: self.y.ok_or(DecodeError::MissingField("y"))?,
                z: self.z.ok_or(DecodeError::MissingField("z"))?,
            }),
            SensorKind::Bvp => SensorReading::Bvp(self.scalar_value()?),
            SensorKind::Temperature => SensorReading::Temperature(self.scalar_value()?),
            SensorKind::Gsr => SensorReading::Gsr(self.scalar_value()?),
            SensorKind::Tag => {
                let value = self.value.as_ref().ok_or(DecodeError::MissingField("value"))?;
                let label = TagValue::from_json(value).ok_or_else(|| DecodeError::InvalidValue {
                    field: "value",
                    reason: format!("tag label must be a string, number or bool, got {}", value),
                })?;
                SensorReading::Tag(label)
            }
        };

        Ok(SensorEvent::new(
            self.device.clone().unwrap_or_default(),
            self.run.clone().unwrap_or_default(),
            timestamp_millis,
            reading,
        ))
    }

    fn timestamp_millis(&self) -> Result<i64, DecodeError> {
        let ts = self
            .timestamp
            .as_ref()
            .ok_or(DecodeError::MissingField("timestamp"))?;

        if let Some(ms) = ts.as_i64() {
            return Ok(ms);
        }
        match ts.as_f64() {
            Some(ms) if ms.is_finite() && ms.abs() < i64::MAX as f64 => Ok(ms.round() as i64),
            _ => Err(DecodeError::InvalidTimestamp(ts.to_string())),
        }
    }

    fn scalar_value(&self) -> Result<f64, DecodeError> {
        let value = self.value.as_ref().ok_or(DecodeError::MissingField("value"))?;
        value.as_f64().ok_or_else(|| DecodeError::InvalidValue {
            field: "value",
            reason: format!("expected a number, got {}", value),
        })
    }
}

/// Parse and decode a request body in one step
pub fn decode_body(body: &[u8]) -> Result<SensorEvent, DecodeError> {
    RawSensorEvent::from_slice(body)?.decode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_temperature() {
        let body = br#"{"type":"temp","device":"d1","run":"r1","timestamp":1000,"value":30.5}"#;
        let event = decode_body(body).unwrap();

        assert_eq!(event.kind(), SensorKind::Temperature);
        assert_eq!(event.device_id, "d1");
        assert_eq!(event.run_tag, "r1");
        assert_eq!(event.timestamp_millis, 1000);
        assert_eq!(event.reading, SensorReading::Temperature(30.5));
    }

    #[test]
    fn test_decode_accelerometer() {
        let body =
            br#"{"type":"acc","device":"d1","run":"r1","timestamp":5,"x":1,"y":-2.5,"z":64}"#;
        let event = decode_body(body).unwrap();

        assert_eq!(
            event.reading,
            SensorReading::Accelerometer(Vector3::new(1.0, -2.5, 64.0))
        );
    }

    #[test]
    fn test_decode_tag_keeps_label() {
        let body = br#"{"type":"tag","device":"d1","run":"r1","timestamp":5,"value":"start"}"#;
        let event = decode_body(body).unwrap();
        assert_eq!(
            event.reading,
            SensorReading::Tag(TagValue::Text("start".to_string()))
        );

        let body = br#"{"type":"tag","device":"d1","run":"r1","timestamp":5,"value":4}"#;
        assert_eq!(
            decode_body(body).unwrap().reading,
            SensorReading::Tag(TagValue::Integer(4))
        );
    }

    #[test]
    fn test_float_timestamp_rounded() {
        let body = br#"{"type":"bvp","device":"d1","run":"r1","timestamp":1234.6,"value":1.0}"#;
        assert_eq!(decode_body(body).unwrap().timestamp_millis, 1235);
    }

    #[test]
    fn test_missing_identity_defaults_to_empty() {
        let body = br#"{"type":"gsr","timestamp":1,"value":0.07}"#;
        let event = decode_body(body).unwrap();
        assert_eq!(event.device_id, "");
        assert_eq!(event.run_tag, "");
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode_body(b"not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert_eq!(
            decode_body(br#"{"type":"hr","timestamp":1,"value":60}"#),
            Err(DecodeError::UnknownType("hr".to_string()))
        );
        assert_eq!(
            decode_body(br#"{"timestamp":1,"value":60}"#),
            Err(DecodeError::MissingField("type"))
        );
        assert_eq!(
            decode_body(br#"{"type":"acc","timestamp":1,"x":1,"y":2}"#),
            Err(DecodeError::MissingField("z"))
        );
        assert_eq!(
            decode_body(br#"{"type":"temp","value":30}"#),
            Err(DecodeError::MissingField("timestamp"))
        );
        assert!(matches!(
            decode_body(br#"{"type":"temp","timestamp":1,"value":"warm"}"#),
            Err(DecodeError::InvalidValue { field: "value", .. })
        ));
        assert!(matches!(
            decode_body(br#"{"type":"tag","timestamp":1,"value":null}"#),
            Err(DecodeError::MissingField("value")) | Err(DecodeError::InvalidValue { .. })
        ));
    }
}
