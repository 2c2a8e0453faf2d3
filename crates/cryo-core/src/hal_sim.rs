use crate::error::HardwareError;
use crate::hal::{ControlSurface, RigIO};
use crate::tags;
use crate::telemetry::{ChannelKey, TelemetryStore};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Write-type command seen by the simulated rig, in issue order.
#[derive(Debug, Clone, PartialEq)]
pub enum RigOp {
    Prepare { channel: ChannelKey, value: f64 },
    Commit { channel: ChannelKey },
    PauseLoops,
    ResumeLoops,
}

/// Simulated two-stage cryostat with magnet, current source and voltmeter.
///
/// Clones share state, so one clone can sit in the sequence worker while
/// another is stepped and polled by a telemetry thread.
#[derive(Debug, Clone)]
pub struct SimulatedRig {
    state: Arc<Mutex<RigState>>,
}

#[derive(Debug)]
struct RigState {
    sample_temp_k: f64,
    vti_temp_k: f64,
    field_t: f64,
    current_a: f64,

    sample_target_k: f64,
    vti_target_k: f64,
    /// First-order lag of both temperature stages; `None` reaches setpoints
    /// on commit.
    time_constant_s: Option<f64>,
    resistance_ohm: f64,
    offset_voltage_v: f64,

    staged: HashMap<ChannelKey, f64>,
    committed: HashMap<ChannelKey, f64>,
    loops_paused: bool,
    commands: Vec<RigOp>,

    failing_reads: HashSet<ChannelKey>,
    failing_commits: HashSet<ChannelKey>,
    quiet_commits: HashSet<ChannelKey>,
}

impl SimulatedRig {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RigState {
                sample_temp_k: 300.0,
                vti_temp_k: 300.0,
                field_t: 0.0,
                current_a: 0.0,
                sample_target_k: 300.0,
                vti_target_k: 300.0,
                time_constant_s: None,
                resistance_ohm: 100.0,
                offset_voltage_v: 0.0,
                staged: HashMap::new(),
                committed: HashMap::new(),
                loops_paused: false,
                commands: Vec::new(),
                failing_reads: HashSet::new(),
                failing_commits: HashSet::new(),
                quiet_commits: HashSet::new(),
            })),
        }
    }

    pub fn with_time_constant(time_constant_s: f64) -> Self {
        let rig = Self::new();
        rig.lock().time_constant_s = Some(time_constant_s);
        rig
    }

    pub fn set_sample_temperature(&self, kelvin: f64) {
        let mut state = self.lock();
        state.sample_temp_k = kelvin;
        state.sample_target_k = kelvin;
    }

    pub fn set_field(&self, tesla: f64) {
        self.lock().field_t = tesla;
    }

    pub fn set_sample_resistance(&self, ohm: f64) {
        self.lock().resistance_ohm = ohm;
    }

    pub fn set_offset_voltage(&self, volt: f64) {
        self.lock().offset_voltage_v = volt;
    }

    /// Reads of `channel` fail with a transport error from now on.
    pub fn fail_reads_on(&self, channel: ChannelKey) {
        self.lock().failing_reads.insert(channel);
    }

    /// Commits on `channel` fail with a device error from now on.
    pub fn fail_commits_on(&self, channel: ChannelKey) {
        self.lock().failing_commits.insert(channel);
    }

    /// Commits on `channel` take effect but report the benign timeout.
    pub fn quiet_commits_on(&self, channel: ChannelKey) {
        self.lock().quiet_commits.insert(channel);
    }

    pub fn commands(&self) -> Vec<RigOp> {
        self.lock().commands.clone()
    }

    pub fn committed(&self, channel: &ChannelKey) -> Option<f64> {
        self.lock().committed.get(channel).copied()
    }

    /// Values committed to `channel`, oldest first.
    pub fn commit_history(&self, channel: &ChannelKey) -> Vec<f64> {
        let state = self.lock();
        let mut staged = None;
        let mut history = Vec::new();
        for op in &state.commands {
            match op {
                RigOp::Prepare { channel: c, value } if c == channel => staged = Some(*value),
                RigOp::Commit { channel: c } if c == channel => history.extend(staged),
                _ => {}
            }
        }
        history
    }

    pub fn loops_paused(&self) -> bool {
        self.lock().loops_paused
    }

    /// Advances the thermal model by `dt_s` seconds.
    pub fn step(&self, dt_s: f64) {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(tau) = state.time_constant_s else {
            return;
        };
        let alpha = 1.0 - (-dt_s / tau.max(f64::EPSILON)).exp();
        // Control loops hold their last output while paused.
        if state.loops_paused {
            return;
        }
        state.vti_temp_k += (state.vti_target_k - state.vti_temp_k) * alpha;
        state.sample_temp_k += (state.sample_target_k - state.sample_temp_k) * alpha;
    }

    /// Writes the current readings into the shared telemetry store.
    pub fn publish(&self, store: &TelemetryStore) {
        let (sample, vti, field, current) = {
            let state = self.lock();
            (
                state.sample_temp_k,
                state.vti_temp_k,
                state.field_t,
                state.current_a,
            )
        };
        store.publish(&tags::SAMPLE_TEMP_K.key(), sample);
        store.publish(&tags::VTI_TEMP_K.key(), vti);
        store.publish(&tags::MAGNET_FIELD_T.key(), field);
        store.publish(&tags::SOURCE_CURRENT_A.key(), current);
    }

    fn lock(&self) -> MutexGuard<'_, RigState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SimulatedRig {
    fn default() -> Self {
        Self::new()
    }
}

impl RigState {
    fn apply(&mut self, channel: &ChannelKey, value: f64) {
        let instant = self.time_constant_s.is_none();
        if *channel == tags::SAMPLE_SETPOINT_K.key() {
            self.sample_target_k = value;
            if instant {
                self.sample_temp_k = value;
            }
        } else if *channel == tags::VTI_SETPOINT_K.key() {
            self.vti_target_k = value;
            if instant {
                self.vti_temp_k = value;
            }
        } else if *channel == tags::SOURCE_CURRENT_A.key() {
            self.current_a = value;
        } else if *channel == tags::MAGNET_FIELD_T.key() {
            self.field_t = value;
        }
    }
}

impl RigIO for SimulatedRig {
    fn read(&mut self, channel: &ChannelKey) -> Result<f64, HardwareError> {
        let state = self.lock();
        if state.failing_reads.contains(channel) {
            return Err(HardwareError::Transport {
                device: channel.device.clone(),
                message: format!("no response reading {}", channel.channel),
            });
        }
        let value = if *channel == tags::SAMPLE_TEMP_K.key() {
            state.sample_temp_k
        } else if *channel == tags::VTI_TEMP_K.key() {
            state.vti_temp_k
        } else if *channel == tags::MAGNET_FIELD_T.key() {
            state.field_t
        } else if *channel == tags::SOURCE_CURRENT_A.key() {
            state.current_a
        } else if *channel == tags::SAMPLE_VOLTAGE_V.key() {
            state.current_a * state.resistance_ohm + state.offset_voltage_v
        } else {
            return Err(HardwareError::Device {
                device: channel.device.clone(),
                message: format!("unknown channel {}", channel.channel),
            });
        };
        Ok(value)
    }

    fn prepare_setpoint(&mut self, channel: &ChannelKey, value: f64) -> Result<(), HardwareError> {
        let mut state = self.lock();
        state.commands.push(RigOp::Prepare {
            channel: channel.clone(),
            value,
        });
        state.staged.insert(channel.clone(), value);
        Ok(())
    }

    fn commit_setpoint(&mut self, channel: &ChannelKey) -> Result<(), HardwareError> {
        let mut state = self.lock();
        state.commands.push(RigOp::Commit {
            channel: channel.clone(),
        });
        if state.failing_commits.contains(channel) {
            return Err(HardwareError::Device {
                device: channel.device.clone(),
                message: "setpoint rejected".to_string(),
            });
        }
        let Some(value) = state.staged.remove(channel) else {
            return Err(HardwareError::Device {
                device: channel.device.clone(),
                message: format!("nothing staged for {}", channel.channel),
            });
        };
        state.committed.insert(channel.clone(), value);
        state.apply(channel, value);
        if state.quiet_commits.contains(channel) {
            return Err(HardwareError::Timeout {
                device: channel.device.clone(),
            });
        }
        Ok(())
    }

    fn pause_control_loops(&mut self) -> Result<(), HardwareError> {
        let mut state = self.lock();
        state.commands.push(RigOp::PauseLoops);
        state.loops_paused = true;
        Ok(())
    }

    fn resume_control_loops(&mut self) -> Result<(), HardwareError> {
        let mut state = self.lock();
        state.commands.push(RigOp::ResumeLoops);
        state.loops_paused = false;
        Ok(())
    }
}

/// Control surface that records every toggle.
#[derive(Debug, Clone, Default)]
pub struct RecordingControls {
    toggles: Arc<Mutex<Vec<bool>>>,
}

impl RecordingControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn toggles(&self) -> Vec<bool> {
        self.toggles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ControlSurface for RecordingControls {
    fn set_controls_enabled(&mut self, enabled: bool) {
        self.toggles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_rig_reaches_setpoint_on_commit() {
        let mut rig = SimulatedRig::new();
        let sp = tags::SAMPLE_SETPOINT_K.key();
        rig.prepare_setpoint(&sp, 4.3).unwrap();
        assert_eq!(rig.read(&tags::SAMPLE_TEMP_K.key()).unwrap(), 300.0);
        rig.commit_setpoint(&sp).unwrap();
        assert_eq!(rig.read(&tags::SAMPLE_TEMP_K.key()).unwrap(), 4.3);
        assert_eq!(rig.commit_history(&sp), vec![4.3]);
    }

    #[test]
    fn lagged_rig_approaches_setpoint() {
        let mut rig = SimulatedRig::with_time_constant(1.0);
        let sp = tags::VTI_SETPOINT_K.key();
        rig.prepare_setpoint(&sp, 100.0).unwrap();
        rig.commit_setpoint(&sp).unwrap();
        rig.step(1.0);
        let vti = rig.read(&tags::VTI_TEMP_K.key()).unwrap();
        assert!(vti < 300.0 && vti > 100.0);
        for _ in 0..50 {
            rig.step(1.0);
        }
        assert!((rig.read(&tags::VTI_TEMP_K.key()).unwrap() - 100.0).abs() < 1e-6);
    }

    #[test]
    fn commit_without_prepare_is_error() {
        let mut rig = SimulatedRig::new();
        assert!(rig.commit_setpoint(&tags::SAMPLE_SETPOINT_K.key()).is_err());
    }

    #[test]
    fn voltage_includes_offset() {
        let mut rig = SimulatedRig::new();
        rig.set_offset_voltage(1e-3);
        let src = tags::SOURCE_CURRENT_A.key();
        rig.prepare_setpoint(&src, 1e-3).unwrap();
        rig.commit_setpoint(&src).unwrap();
        let v = rig.read(&tags::SAMPLE_VOLTAGE_V.key()).unwrap();
        assert!((v - (0.1 + 1e-3)).abs() < 1e-12);
    }

    #[test]
    fn publish_fills_store() {
        let rig = SimulatedRig::new();
        rig.set_field(1.5);
        let store = TelemetryStore::new();
        rig.publish(&store);
        assert_eq!(store.read(&tags::MAGNET_FIELD_T.key()), Some(1.5));
        assert_eq!(store.read(&tags::SAMPLE_TEMP_K.key()), Some(300.0));
    }
}
