//! Accelerometer smoothing
//!
//! This module keeps fixed-length moving-average windows for the three
//! accelerometer axes. Windows start zero-filled, so the first
//! [`DEFAULT_WINDOW_LEN`] updates are biased towards zero.

use crate::types::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Default number of samples per axis window
pub const DEFAULT_WINDOW_LEN: usize = 10;

/// Fixed-capacity FIFO of rescaled samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WindowState")]
pub struct SmoothingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

/// Serialized form of a window, checked before use
#[derive(Deserialize)]
struct WindowState {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl TryFrom<WindowState> for SmoothingWindow {
    type Error = String;

    fn try_from(state: WindowState) -> Result<Self, Self::Error> {
        if state.capacity == 0 {
            return Err("smoothing window capacity must be at least 1".to_string());
        }
        if state.samples.len() != state.capacity {
            return Err(format!(
                "smoothing window holds {} samples, expected {}",
                state.samples.len(),
                state.capacity
            ));
        }
        if state.samples.iter().any(|v| !v.is_finite()) {
            return Err("smoothing window contains a non-finite sample".to_string());
        }
        Ok(Self {
            samples: state.samples,
            capacity: state.capacity,
        })
    }
}

impl Default for SmoothingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_LEN)
    }
}

impl SmoothingWindow {
    /// Create a zero-filled window; a zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: std::iter::repeat(0.0).take(capacity).collect(),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest, and return the new mean
    pub fn push(&mut self, sample: f64) -> f64 {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        self.mean()
    }

    /// Arithmetic mean over the full window, zero padding included
    pub fn mean(&self) -> f64 {
        let sum: f64 = self.samples.iter().sum();
        sum / self.capacity as f64
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples from oldest to newest
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

/// Moving average over the x, y and z axes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccelerometerSmoother {
    x: SmoothingWindow,
    y: SmoothingWindow,
    z: SmoothingWindow,
}

impl Default for AccelerometerSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_LEN)
    }
}

impl AccelerometerSmoother {
    pub fn new(window_len: usize) -> Self {
        Self {
            x: SmoothingWindow::new(window_len),
            y: SmoothingWindow::new(window_len),
            z: SmoothingWindow::new(window_len),
        }
    }

    /// Feed one rescaled sample per axis and return the per-axis averages
    pub fn update(&mut self, x: f64, y: f64, z: f64) -> Vector3 {
        Vector3 {
            x: self.x.push(x),
            y: self.y.push(y),
            z: self.z.push(z),
        }
    }

    /// Current averages without feeding a sample
    pub fn averages(&self) -> Vector3 {
        Vector3 {
            x: self.x.mean(),
            y: self.y.mean(),
            z: self.z.mean(),
        }
    }

    fn has_window_len(&self, window_len: usize) -> bool {
        [&self.x, &self.y, &self.z]
            .iter()
            .all(|w| w.capacity() == window_len)
    }
}

/// How accelerometer windows are shared between devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingScope {
    /// One window set for every device (readings from devices interleave)
    #[default]
    Global,
    /// One window set per device id
    PerDevice,
}

/// Owner of all smoothing state used by the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BankState")]
pub struct SmootherBank {
    scope: SmoothingScope,
    window_len: usize,
    global: AccelerometerSmoother,
    #[serde(default)]
    devices: HashMap<String, AccelerometerSmoother>,
}

#[derive(Deserialize)]
struct BankState {
    scope: SmoothingScope,
    window_len: usize,
    global: AccelerometerSmoother,
    #[serde(default)]
    devices: HashMap<String, AccelerometerSmoother>,
}

impl TryFrom<BankState> for SmootherBank {
    type Error = String;

    fn try_from(state: BankState) -> Result<Self, Self::Error> {
        if !state.global.has_window_len(state.window_len) {
            return Err(format!(
                "global smoother does not use window length {}",
                state.window_len
            ));
        }
        if let Some((device, _)) = state
            .devices
            .iter()
            .find(|(_, smoother)| !smoother.has_window_len(state.window_len))
        {
            return Err(format!(
                "smoother for device {:?} does not use window length {}",
                device, state.window_len
            ));
        }
        Ok(Self {
            scope: state.scope,
            window_len: state.window_len,
            global: state.global,
            devices: state.devices,
        })
    }
}

impl Default for SmootherBank {
    fn default() -> Self {
        Self::new(SmoothingScope::Global)
    }
}

impl SmootherBank {
    pub fn new(scope: SmoothingScope) -> Self {
        Self::with_window_len(scope, DEFAULT_WINDOW_LEN)
    }

    pub fn with_window_len(scope: SmoothingScope, window_len: usize) -> Self {
        let window_len = window_len.max(1);
        Self {
            scope,
            window_len,
            global: AccelerometerSmoother::new(window_len),
            devices: HashMap::new(),
        }
    }

    pub fn scope(&self) -> SmoothingScope {
        self.scope
    }

    /// Smoother responsible for `device_id`, created zero-filled on first use
    pub fn smoother_for(&mut self, device_id: &str) -> &mut AccelerometerSmoother {
        match self.scope {
            SmoothingScope::Global => &mut self.global,
            SmoothingScope::PerDevice => {
                let window_len = self.window_len;
                self.devices
                    .entry(device_id.to_string())
                    .or_insert_with(|| AccelerometerSmoother::new(window_len))
            }
        }
    }

    /// Update the smoother for `device_id` with one rescaled sample
    pub fn update(&mut self, device_id: &str, sample: Vector3) -> Vector3 {
        self.smoother_for(device_id)
            .update(sample.x, sample.y, sample.z)
    }

    /// Number of devices with their own window set
    pub fn tracked_devices(&self) -> usize {
        self.devices.len()
    }

    /// Load smoothing state from JSON, rejecting windows that do not hold
    /// exactly `window_len` finite samples
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize smoothing state to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
