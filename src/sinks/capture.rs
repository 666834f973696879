//! In-memory sinks
//!
//! Used by `replay --dry-run` and by tests. Clones share the same buffer, so
//! a handle kept outside the dispatcher observes everything it emitted.

use super::{OscArg, Record, RecordSink, SinkError, StreamSink};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Message captured by [`CaptureStreamSink`]
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub address: String,
    pub value: OscArg,
}

/// Stream sink that stores every message
#[derive(Debug, Clone, Default)]
pub struct CaptureStreamSink {
    messages: Arc<Mutex<Vec<StreamMessage>>>,
    fail: bool,
}

impl CaptureStreamSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that rejects every message
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<StreamMessage> {
        lock(&self.messages).clone()
    }

    /// Remove and return everything captured so far
    pub fn drain(&self) -> Vec<StreamMessage> {
        std::mem::take(&mut *lock(&self.messages))
    }
}

impl StreamSink for CaptureStreamSink {
    fn send(&mut self, address: &str, value: &OscArg) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError::Transport("stream sink unavailable".to_string()));
        }
        lock(&self.messages).push(StreamMessage {
            address: address.to_string(),
            value: value.clone(),
        });
        Ok(())
    }
}

/// Record sink that stores every record
#[derive(Debug, Clone, Default)]
pub struct CaptureRecordSink {
    records: Arc<Mutex<Vec<Record>>>,
    fail: bool,
}

impl CaptureRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that rejects every record
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<Record> {
        lock(&self.records).clone()
    }
}

impl RecordSink for CaptureRecordSink {
    fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError::Rejected {
                status: 503,
                body: "record sink unavailable".to_string(),
            });
        }
        lock(&self.records).push(record.clone());
        Ok(())
    }
}
