//! Current-reversal resistance measurement.
//!
//! A constant thermal offset voltage `V_off` adds to both polarities, while the
//! true signal `I*R` flips sign with the current. Each sample restores the
//! sign once, `(V * p) / I`, so the `+I` and `-I` samples come out as
//! `R + V_off/I` and `R - V_off/I` and the offset cancels in the mean.

use crate::cancel::CancellationToken;
use crate::error::{tolerate_benign, ConfigError, HardwareError};
use crate::hal::RigIO;
use crate::tags;
use crate::telemetry::ChannelKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    pub temperature_channel: ChannelKey,
    pub resistance_channel: Option<ChannelKey>,
    pub current_channel: Option<ChannelKey>,
    /// Must be supplied by the operator before measuring.
    pub applied_current_a: Option<f64>,
    pub sample_count: u32,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            temperature_channel: tags::SAMPLE_TEMP_K.key(),
            resistance_channel: None,
            current_channel: None,
            applied_current_a: None,
            sample_count: 10,
        }
    }
}

/// Checked form of [`MeasurementConfig`]; every field is present.
#[derive(Debug, Clone, PartialEq)]
struct Plan<'a> {
    temperature: &'a ChannelKey,
    voltage: &'a ChannelKey,
    current: &'a ChannelKey,
    current_a: f64,
    samples: u32,
}

impl MeasurementConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.plan().map(|_| ())
    }

    fn plan(&self) -> Result<Plan<'_>, ConfigError> {
        let current_a = self
            .applied_current_a
            .ok_or(ConfigError::MissingAppliedCurrent)?;
        if !current_a.is_finite() || current_a == 0.0 {
            return Err(ConfigError::InvalidAppliedCurrent { value: current_a });
        }
        let voltage = self
            .resistance_channel
            .as_ref()
            .ok_or(ConfigError::MissingChannel { role: "resistance" })?;
        let current = self
            .current_channel
            .as_ref()
            .ok_or(ConfigError::MissingChannel { role: "current" })?;
        if self.sample_count == 0 {
            return Err(ConfigError::InvalidSampleCount);
        }
        Ok(Plan {
            temperature: &self.temperature_channel,
            voltage,
            current,
            current_a,
            samples: self.sample_count,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementResult {
    #[serde(rename = "T_mean_K")]
    pub t_mean_k: f64,
    #[serde(rename = "T_std_K")]
    pub t_std_k: f64,
    #[serde(rename = "R_mean_Ohm")]
    pub r_mean_ohm: f64,
    #[serde(rename = "R_std_Ohm")]
    pub r_std_ohm: f64,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MeasurementError {
    #[error("measurement configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("measurement hardware fault: {0}")]
    Hardware(#[from] HardwareError),
    #[error("measurement cancelled")]
    Cancelled,
}

/// Pauses the rig's control loops for as long as it lives.
struct PausedLoops<'a, IO: RigIO + ?Sized> {
    io: &'a mut IO,
    resumed: bool,
}

impl<'a, IO: RigIO + ?Sized> PausedLoops<'a, IO> {
    fn pause(io: &'a mut IO) -> Result<Self, HardwareError> {
        tolerate_benign(io.pause_control_loops())?;
        Ok(Self { io, resumed: false })
    }

    fn resume(mut self) -> Result<(), HardwareError> {
        self.resumed = true;
        tolerate_benign(self.io.resume_control_loops())
    }
}

impl<IO: RigIO + ?Sized> Drop for PausedLoops<'_, IO> {
    fn drop(&mut self) {
        if !self.resumed {
            if let Err(err) = tolerate_benign(self.io.resume_control_loops()) {
                log::warn!("failed to resume control loops after aborted measurement: {err}");
            }
        }
    }
}

pub fn measure<IO: RigIO + ?Sized>(
    io: &mut IO,
    config: &MeasurementConfig,
    token: &CancellationToken,
) -> Result<MeasurementResult, MeasurementError> {
    let plan = config.plan()?;
    log::debug!(
        "measuring resistance on {} with {} A, {} reversal pairs",
        plan.voltage,
        plan.current_a,
        plan.samples
    );

    let mut paused = PausedLoops::pause(io)?;
    let mut temps = Vec::with_capacity(2);
    let mut resistances = Vec::with_capacity(2 * plan.samples as usize);

    temps.push(paused.io.read(plan.temperature)?);
    for _ in 0..plan.samples {
        for polarity in [1.0, -1.0] {
            if token.is_stopped() {
                return Err(MeasurementError::Cancelled);
            }
            let current = plan.current_a * polarity;
            tolerate_benign(paused.io.prepare_setpoint(plan.current, current))?;
            tolerate_benign(paused.io.commit_setpoint(plan.current))?;
            let signed_voltage = paused.io.read(plan.voltage)? * polarity;
            resistances.push(signed_voltage / plan.current_a);
        }
    }
    temps.push(paused.io.read(plan.temperature)?);
    paused.resume()?;

    let (t_mean_k, t_std_k) = mean_std(&temps);
    let (r_mean_ohm, r_std_ohm) = mean_std(&resistances);
    Ok(MeasurementResult {
        t_mean_k,
        t_std_k,
        r_mean_ohm,
        r_std_ohm,
    })
}

/// Mean and population standard deviation.
fn mean_std(samples: &[f64]) -> (f64, f64) {
    if samples.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
