//! InfluxDB line protocol encoding
//!
//! `measurement,device_id=<d>,run_tag=<r> field=value[,field=value] <timestamp_ms>`

use super::{FieldValue, Record, RecordFields, SinkError};
use std::fmt::Write;

fn escape_measurement(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, ',' | ' ') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn escape_key(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, ',' | '=' | ' ') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn escape_string_field(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn format_float(name: &str, v: f64) -> Result<String, SinkError> {
    if !v.is_finite() {
        return Err(SinkError::Encode(format!(
            "Field '{}' is not a finite number: {}",
            name, v
        )));
    }
    Ok(format!("{}", v))
}

fn format_field(name: &str, value: &FieldValue) -> Result<String, SinkError> {
    let formatted = match value {
        FieldValue::Float(v) => format_float(name, *v)?,
        FieldValue::Integer(i) => format!("{}i", i),
        FieldValue::Text(s) => escape_string_field(s),
        FieldValue::Bool(b) => b.to_string(),
    };
    Ok(format!("{}={}", escape_key(name), formatted))
}

/// Encode a record as one line of line protocol (no trailing newline)
pub fn encode(record: &Record) -> Result<String, SinkError> {
    if record.measurement.is_empty() {
        return Err(SinkError::Encode("Empty measurement name".to_string()));
    }

    let mut line = escape_measurement(&record.measurement);

    // Empty tag values are not allowed by the protocol, so they are left out
    for (key, value) in [("device_id", &record.device_id), ("run_tag", &record.run_tag)] {
        if !value.is_empty() {
            let _ = write!(line, ",{}={}", key, escape_key(value));
        }
    }

    let fields = match &record.fields {
        RecordFields::Reading(value) => vec![format_field("reading", value)?],
        RecordFields::Axes(axes) => vec![
            format_field("x", &FieldValue::Float(axes.x))?,
            format_field("y", &FieldValue::Float(axes.y))?,
            format_field("z", &FieldValue::Float(axes.z))?,
        ],
    };

    let _ = write!(line, " {} {}", fields.join(","), record.timestamp_millis);
    Ok(line)
}
