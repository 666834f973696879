//! Event dispatch
//!
//! The dispatcher is the stateful core of the relay. Each decoded event goes
//! through the same stages:
//!
//! 1. CalibrationTable - rescale the raw reading into `[0, 1]`
//! 2. SmootherBank - moving average of the rescaled accelerometer axes
//! 3. StreamSink - one message per value (three for accelerometer)
//! 4. RecordSink - one record, only while recording
//!
//! Sink failures are logged and counted but never abort dispatch or roll back
//! smoothing state.

use crate::calibration::CalibrationTable;
use crate::config::{PipelineConfig, RelayConfig};
use crate::error::RelayError;
use crate::sinks::{
    InfluxRecordSink, NullRecordSink, OscArg, OscStreamSink, Record, RecordSink, SinkError,
    StreamSink,
};
use crate::smoother::SmootherBank;
use crate::types::{
    NormalizedReading, ReadingValue, SensorEvent, SensorKind, SensorReading, Vector3,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Default address prefix of stream messages
pub const DEFAULT_TOPIC_PREFIX: &str = "/e4";

/// Per-event switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMode {
    /// Persist the normalized reading to the record sink
    pub recording: bool,
    /// Suppress the per-event diagnostic log line
    pub quiet: bool,
}

impl DispatchMode {
    pub fn new(recording: bool, quiet: bool) -> Self {
        Self { recording, quiet }
    }
}

impl From<&PipelineConfig> for DispatchMode {
    fn from(config: &PipelineConfig) -> Self {
        Self::new(config.record_mode, config.quiet_mode)
    }
}

/// Counters kept across the dispatcher lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub events: u64,
    pub stream_failures: u64,
    pub records_written: u64,
    pub record_failures: u64,
}

/// Stateful dispatcher owning the smoothing windows and both sinks
pub struct EventDispatcher {
    calibration: CalibrationTable,
    smoothers: SmootherBank,
    stream: Box<dyn StreamSink>,
    record: Box<dyn RecordSink>,
    topic_prefix: String,
    start_millis: i64,
    stats: DispatchStats,
}

impl EventDispatcher {
    /// Create a dispatcher; an invalid calibration table is rejected here
    pub fn new(
        calibration: CalibrationTable,
        smoothers: SmootherBank,
        stream: Box<dyn StreamSink>,
        record: Box<dyn RecordSink>,
    ) -> Result<Self, RelayError> {
        calibration.validate()?;

        Ok(Self {
            calibration,
            smoothers,
            stream,
            record,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            start_millis: chrono::Utc::now().timestamp_millis(),
            stats: DispatchStats::default(),
        })
    }

    /// Create a dispatcher with the configured OSC destination and, when
    /// recording is enabled, the configured InfluxDB bucket
    pub fn from_config(config: &RelayConfig, smoothers: SmootherBank) -> Result<Self, RelayError> {
        let stream = OscStreamSink::connect(&config.osc.host, config.osc.port)?;
        let record: Box<dyn RecordSink> = if config.pipeline.record_mode {
            Box::new(InfluxRecordSink::new(&config.influx)?)
        } else {
            Box::new(NullRecordSink)
        };

        Ok(Self::new(CalibrationTable::default(), smoothers, Box::new(stream), record)?
            .with_topic_prefix(config.osc.prefix.as_str()))
    }

    /// Use a different address prefix; a trailing `/` is dropped
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.topic_prefix = prefix.trim_end_matches('/').to_string();
        self
    }

    /// Reference time for the elapsed value in diagnostic logs
    pub fn with_start_time(mut self, start_millis: i64) -> Self {
        self.start_millis = start_millis;
        self
    }

    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn smoothers(&self) -> &SmootherBank {
        &self.smoothers
    }

    /// Consume the dispatcher, keeping the smoothing state
    pub fn into_smoothers(self) -> SmootherBank {
        self.smoothers
    }

    /// Normalize one event and fan it out to the sinks
    pub fn dispatch(&mut self, event: &SensorEvent, mode: DispatchMode) -> NormalizedReading {
        self.stats.events += 1;

        if !mode.quiet {
            info!(
                kind = %event.kind(),
                device_id = %event.device_id,
                elapsed_ms = event.timestamp_millis.saturating_sub(self.start_millis),
                raw = %event.reading,
                "event received"
            );
        }

        let value = match &event.reading {
            SensorReading::Accelerometer(sample) => {
                let range = self.calibration.accelerometer;
                let scaled = Vector3::new(
                    range.apply(sample.x),
                    range.apply(sample.y),
                    range.apply(sample.z),
                );
                let averages = self.smoothers.update(&event.device_id, scaled);
                self.emit("acc/x", &OscArg::from(averages.x));
                self.emit("acc/y", &OscArg::from(averages.y));
                self.emit("acc/z", &OscArg::from(averages.z));
                ReadingValue::Vector3(averages)
            }
            SensorReading::Bvp(raw) => {
                let value = self.calibration.bvp.apply(*raw);
                self.emit_scalar(SensorKind::Bvp, value)
            }
            SensorReading::Temperature(raw) => {
                let value = self.calibration.temperature.apply(*raw);
                self.emit_scalar(SensorKind::Temperature, value)
            }
            SensorReading::Gsr(raw) => {
                let value = self.calibration.gsr.apply(*raw);
                self.emit_scalar(SensorKind::Gsr, value)
            }
            SensorReading::Tag(label) => {
                self.emit(SensorKind::Tag.as_str(), &OscArg::from(label));
                ReadingValue::Label(label.clone())
            }
        };

        let reading = NormalizedReading {
            kind: event.kind(),
            device_id: event.device_id.clone(),
            run_tag: event.run_tag.clone(),
            timestamp_millis: event.timestamp_millis,
            value,
        };

        if mode.recording {
            self.persist(&reading);
        }

        reading
    }

    fn emit_scalar(&mut self, kind: SensorKind, value: f64) -> ReadingValue {
        self.emit(kind.as_str(), &OscArg::from(value));
        ReadingValue::Scalar(value)
    }

    fn emit(&mut self, suffix: &str, value: &OscArg) {
        let address = format!("{}/{}", self.topic_prefix, suffix);
        if let Err(e) = self.stream.send(&address, value) {
            self.stats.stream_failures += 1;
            warn!(%address, error = %e, "stream emission failed");
        }
    }

    fn persist(&mut self, reading: &NormalizedReading) {
        let record = Record::from_reading(reading);
        match self.record.write(&record) {
            Ok(()) => self.stats.records_written += 1,
            Err(e) => {
                self.stats.record_failures += 1;
                log_record_failure(&record, &e);
            }
        }
    }
}

fn log_record_failure(record: &Record, error: &SinkError) {
    warn!(
        measurement = %record.measurement,
        device_id = %record.device_id,
        timestamp_ms = record.timestamp_millis,
        error = %error,
        "record write failed"
    );
}
