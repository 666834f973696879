//! Inbound event schema
//!
//! This module defines the JSON wire format posted by the wearable bridge and
//! its decoding into typed [`SensorEvent`](crate::types::SensorEvent)s, plus
//! helpers for reading recorded event logs (NDJSON or JSON arrays).

mod adapter;
mod raw_event;

pub use adapter::*;
pub use raw_event::*;
