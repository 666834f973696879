//! Range mapping
//!
//! This module rescales raw physical readings into the canonical `[0, 1]`
//! control range using fixed per-sensor calibration ranges.
//! - Linear (affine) transform, no clamping
//! - Ranges are validated once, when the dispatcher is built

use crate::error::RelayError;
use crate::types::SensorKind;
use serde::{Deserialize, Serialize};

/// Linearly map `value` from `[in_min, in_max]` onto `[out_min, out_max]`.
///
/// Values outside the input range map outside the output range. Callers must
/// guarantee `in_min != in_max`; [`CalibrationRange::new`] enforces this.
pub fn rescale(value: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    let in_range = in_max - in_min;
    let out_range = out_max - out_min;
    ((value - in_min) * out_range) / in_range + out_min
}

/// Map `value` from `[in_min, in_max]` onto `[0, 1]`
pub fn rescale_unit(value: f64, in_min: f64, in_max: f64) -> f64 {
    rescale(value, in_min, in_max, 0.0, 1.0)
}

/// Physical input range of a sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRange {
    in_min: f64,
    in_max: f64,
}

impl CalibrationRange {
    /// Create a range; a zero-width or non-finite range is rejected
    pub fn new(in_min: f64, in_max: f64) -> Result<Self, RelayError> {
        let range = Self { in_min, in_max };
        range.validate()?;
        Ok(range)
    }

    const fn fixed(in_min: f64, in_max: f64) -> Self {
        Self { in_min, in_max }
    }

    pub fn in_min(&self) -> f64 {
        self.in_min
    }

    pub fn in_max(&self) -> f64 {
        self.in_max
    }

    /// Rescale a raw value into `[0, 1]`
    pub fn apply(&self, value: f64) -> f64 {
        rescale_unit(value, self.in_min, self.in_max)
    }

    fn validate(&self) -> Result<(), RelayError> {
        if !self.in_min.is_finite() || !self.in_max.is_finite() {
            return Err(RelayError::InvalidCalibration {
                in_min: self.in_min,
                in_max: self.in_max,
                reason: "bounds must be finite",
            });
        }
        if self.in_min == self.in_max {
            return Err(RelayError::InvalidCalibration {
                in_min: self.in_min,
                in_max: self.in_max,
                reason: "zero-width range",
            });
        }
        Ok(())
    }
}

/// Accelerometer axis range (degrees of tilt reported by the device)
pub const ACCELEROMETER_RANGE: CalibrationRange = CalibrationRange::fixed(-90.0, 90.0);
/// Blood-volume pulse range
pub const BVP_RANGE: CalibrationRange = CalibrationRange::fixed(-80.0, 80.0);
/// Skin temperature range (celsius)
pub const TEMPERATURE_RANGE: CalibrationRange = CalibrationRange::fixed(25.0, 36.0);
/// Galvanic skin response range (microsiemens)
pub const GSR_RANGE: CalibrationRange = CalibrationRange::fixed(0.06, 0.08);

/// Per-sensor calibration ranges
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    pub accelerometer: CalibrationRange,
    pub bvp: CalibrationRange,
    pub temperature: CalibrationRange,
    pub gsr: CalibrationRange,
}

impl Default for CalibrationTable {
    fn default() -> Self {
        Self {
            accelerometer: ACCELEROMETER_RANGE,
            bvp: BVP_RANGE,
            temperature: TEMPERATURE_RANGE,
            gsr: GSR_RANGE,
        }
    }
}

impl CalibrationTable {
    /// Range for a sensor kind; tags are never rescaled
    pub fn range_for(&self, kind: SensorKind) -> Option<&CalibrationRange> {
        match kind {
            SensorKind::Accelerometer => Some(&self.accelerometer),
            SensorKind::Bvp => Some(&self.bvp),
            SensorKind::Temperature => Some(&self.temperature),
            SensorKind::Gsr => Some(&self.gsr),
            SensorKind::Tag => None,
        }
    }

    /// Check every range in the table
    pub fn validate(&self) -> Result<(), RelayError> {
        self.accelerometer.validate()?;
        self.bvp.validate()?;
        self.temperature.validate()?;
        self.gsr.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_endpoints_map_to_unit_interval() {
        let table = CalibrationTable::default();
        for kind in SensorKind::ALL {
            if let Some(range) = table.range_for(kind) {
                assert!(range.apply(range.in_min()).abs() < 1e-12);
                assert!((range.apply(range.in_max()) - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_rescale_is_not_clamped() {
        let above = rescale_unit(100.0, -90.0, 90.0);
        assert!((above - 1.055_555).abs() < 1e-5);

        let below = rescale_unit(-100.0, -90.0, 90.0);
        assert!(below < 0.0);
    }

    #[test]
    fn test_rescale_is_monotonic() {
        let samples = [-200.0, -90.0, -12.5, 0.0, 3.0, 90.0, 250.0];
        let mapped: Vec<f64> = samples
            .iter()
            .map(|v| ACCELEROMETER_RANGE.apply(*v))
            .collect();
        assert!(mapped.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_rescale_custom_output_range() {
        assert!((rescale(5.0, 0.0, 10.0, -1.0, 1.0)).abs() < 1e-12);
        assert!((rescale(10.0, 0.0, 10.0, 100.0, 200.0) - 200.0).abs() < 1e-12);
    }

    #[test]
    fn test_sensor_constants() {
        assert!((TEMPERATURE_RANGE.apply(30.5) - 0.5).abs() < 1e-9);
        assert!((BVP_RANGE.apply(0.0) - 0.5).abs() < 1e-12);
        assert!((GSR_RANGE.apply(0.07) - 0.5).abs() < 1e-9);
        assert!((ACCELEROMETER_RANGE.apply(0.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_zero_width_range_rejected() {
        let err = CalibrationRange::new(1.0, 1.0).unwrap_err();
        assert!(matches!(err, RelayError::InvalidCalibration { .. }));

        assert!(CalibrationRange::new(f64::NAN, 1.0).is_err());
        assert!(CalibrationRange::new(0.0, f64::INFINITY).is_err());
        assert!(CalibrationRange::new(36.0, 25.0).is_ok());
    }

    #[test]
    fn test_table_validation() {
        assert!(CalibrationTable::default().validate().is_ok());

        let table = CalibrationTable {
            gsr: CalibrationRange::fixed(0.07, 0.07),
            ..Default::default()
        };
        assert!(table.validate().is_err());
        assert!(table.range_for(SensorKind::Tag).is_none());
    }
}
