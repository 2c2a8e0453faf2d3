use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Identifies one quantity on one instrument, e.g. `LakeShore350/Sensor_1_K`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub device: String,
    pub channel: String,
}

impl ChannelKey {
    pub fn new(device: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            channel: channel.into(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.channel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: f64,
    /// Number of times this channel has been written, starting at 1.
    pub updates: u64,
}

/// Last-read value per channel, written by polling threads and read by the
/// sequence worker. The lock is only held for the map access itself.
#[derive(Debug, Default)]
pub struct TelemetryStore {
    readings: Mutex<HashMap<ChannelKey, Reading>>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by poller threads after every instrument read.
    pub fn publish(&self, key: &ChannelKey, value: f64) {
        let mut readings = self.lock();
        match readings.get_mut(key) {
            Some(reading) => {
                reading.value = value;
                reading.updates += 1;
            }
            None => {
                readings.insert(key.clone(), Reading { value, updates: 1 });
            }
        }
    }

    pub fn read(&self, key: &ChannelKey) -> Option<f64> {
        self.lock().get(key).map(|reading| reading.value)
    }

    pub fn reading(&self, key: &ChannelKey) -> Option<Reading> {
        self.lock().get(key).copied()
    }

    pub fn snapshot(&self) -> HashMap<ChannelKey, Reading> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChannelKey, Reading>> {
        // A poller that panicked mid-write leaves at worst one stale value.
        self.readings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
