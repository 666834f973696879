//! Event log reading
//!
//! Recorded sessions are stored as NDJSON (one posted body per line) or as a
//! JSON array of bodies. This module parses them and decodes/validates each
//! entry for the `replay` and `validate` commands.

use crate::error::RelayError;
use crate::schema::raw_event::{DecodeError, RawSensorEvent};
use crate::types::SensorEvent;

/// Reader for recorded event logs
pub struct EventLog;

impl EventLog {
    /// Parse a JSON string containing an array of events
    pub fn parse_array(json: &str) -> Result<Vec<RawSensorEvent>, RelayError> {
        let events: Vec<RawSensorEvent> = serde_json::from_str(json)?;
        Ok(events)
    }

    /// Parse NDJSON (newline-delimited JSON) containing events
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawSensorEvent>, RelayError> {
        let mut events = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawSensorEvent>(trimmed) {
                Ok(event) => events.push(event),
                Err(e) => {
                    return Err(RelayError::DecodeError(DecodeError::Malformed(format!(
                        "line {}: {}",
                        line_num + 1,
                        e
                    ))));
                }
            }
        }
        Ok(events)
    }

    /// Decode every event, keeping the position of each failure
    pub fn decode_all(events: &[RawSensorEvent]) -> Vec<(usize, Result<SensorEvent, DecodeError>)> {
        events
            .iter()
            .enumerate()
            .map(|(idx, raw)| (idx, raw.decode()))
            .collect()
    }

    /// Validate a batch of events, returning only the failures
    pub fn validate_events(events: &[RawSensorEvent]) -> Vec<ValidationResult> {
        events
            .iter()
            .enumerate()
            .filter_map(|(idx, raw)| {
                raw.decode().err().map(|error| ValidationResult {
                    index: idx,
                    event_type: raw.event_type.clone(),
                    error,
                })
            })
            .collect()
    }
}

/// Failed validation of one event
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub index: usize,
    pub event_type: Option<String>,
    pub error: DecodeError,
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = r#"
{"type":"temp","device":"d1","run":"r1","timestamp":1000,"value":30.5}

{"type":"acc","device":"d1","run":"r1","timestamp":1001,"x":0,"y":0,"z":0}
{"type":"hr","device":"d1","run":"r1","timestamp":1002,"value":61}
"#;

    #[test]
    fn test_parse_ndjson_skips_blank_lines() {
        let events = EventLog::parse_ndjson(LOG).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].event_type.as_deref(), Some("acc"));
    }

    #[test]
    fn test_parse_ndjson_reports_line() {
        let err = EventLog::parse_ndjson("{\"type\":\"temp\"}\n{oops").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_array() {
        let json = r#"[
            {"type":"gsr","timestamp":1,"value":0.07},
            {"type":"tag","timestamp":2,"value":"x"}
        ]"#;
        let events = EventLog::parse_array(json).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_validate_events() {
        let events = EventLog::parse_ndjson(LOG).unwrap();
        let failures = EventLog::validate_events(&events);

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 2);
        assert_eq!(failures[0].event_type.as_deref(), Some("hr"));
        assert_eq!(failures[0].error, DecodeError::UnknownType("hr".to_string()));
    }

    #[test]
    fn test_decode_all_preserves_order() {
        let events = EventLog::parse_ndjson(LOG).unwrap();
        let decoded = EventLog::decode_all(&events);

        assert_eq!(decoded.len(), 3);
        assert!(decoded[0].1.is_ok());
        assert!(decoded[1].1.is_ok());
        assert!(decoded[2].1.is_err());
    }
}
