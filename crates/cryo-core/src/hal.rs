use crate::error::HardwareError;
use crate::telemetry::ChannelKey;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Instrument capabilities the sequence worker needs from the rig.
///
/// Setpoints are two-phase: `prepare_setpoint` stages a value, and
/// `commit_setpoint` makes the controller ramp to it.
pub trait RigIO: Send {
    fn read(&mut self, channel: &ChannelKey) -> Result<f64, HardwareError>;
    fn prepare_setpoint(&mut self, channel: &ChannelKey, value: f64) -> Result<(), HardwareError>;
    fn commit_setpoint(&mut self, channel: &ChannelKey) -> Result<(), HardwareError>;
    /// Suspends the automatic control loops so they do not interfere with a
    /// measurement burst.
    fn pause_control_loops(&mut self) -> Result<(), HardwareError>;
    fn resume_control_loops(&mut self) -> Result<(), HardwareError>;
}

impl<T: RigIO + ?Sized> RigIO for Box<T> {
    fn read(&mut self, channel: &ChannelKey) -> Result<f64, HardwareError> {
        (**self).read(channel)
    }

    fn prepare_setpoint(&mut self, channel: &ChannelKey, value: f64) -> Result<(), HardwareError> {
        (**self).prepare_setpoint(channel, value)
    }

    fn commit_setpoint(&mut self, channel: &ChannelKey) -> Result<(), HardwareError> {
        (**self).commit_setpoint(channel)
    }

    fn pause_control_loops(&mut self) -> Result<(), HardwareError> {
        (**self).pause_control_loops()
    }

    fn resume_control_loops(&mut self) -> Result<(), HardwareError> {
        (**self).resume_control_loops()
    }
}

/// Operator-facing setpoint controls, locked while a sequence runs.
pub trait ControlSurface: Send {
    fn set_controls_enabled(&mut self, enabled: bool);
}

/// Single shared enable flag, readable from any thread.
#[derive(Debug, Clone)]
pub struct ControlsFlag {
    enabled: Arc<AtomicBool>,
}

impl ControlsFlag {
    pub fn new() -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl Default for ControlsFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlSurface for ControlsFlag {
    fn set_controls_enabled(&mut self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}
