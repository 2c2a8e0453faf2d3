use crate::cancel::CancellationToken;
use crate::clock::{Clock, SystemClock};
use crate::error::{tolerate_benign, ConfigError, HardwareError};
use crate::hal::{ControlSurface, RigIO};
use crate::sequence::{Sequence, SequenceStep, Validated};
use crate::tags;
use crate::telemetry::{ChannelKey, TelemetryStore};
use crate::waiter::{wait_until, ConvergenceCriteria, WaitOutcome};
use serde::Serialize;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Lowest VTI setpoint the cryostat can hold.
pub const VTI_FLOOR_K: f64 = 4.3;

#[derive(Clone, Debug, PartialEq)]
pub struct EngineChannels {
    pub vti_setpoint: ChannelKey,
    pub sample_setpoint: ChannelKey,
    pub sample_temperature: ChannelKey,
    pub field: ChannelKey,
}

impl Default for EngineChannels {
    fn default() -> Self {
        Self {
            vti_setpoint: tags::VTI_SETPOINT_K.key(),
            sample_setpoint: tags::SAMPLE_SETPOINT_K.key(),
            sample_temperature: tags::SAMPLE_TEMP_K.key(),
            field: tags::MAGNET_FIELD_T.key(),
        }
    }
}

/// How a `Wait` step treats the magnet field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldWait {
    /// Field is not compared against anything: the step only checks for a
    /// stop request and settles once.
    Unverified { settle: Duration },
    /// Block until the live field reading converges on the step's target.
    Converge(ConvergenceCriteria),
}

impl Default for FieldWait {
    fn default() -> Self {
        FieldWait::Unverified {
            settle: Duration::from_millis(100),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Sample-to-VTI temperature offset.
    pub vti_offset_k: f64,
    pub vti_floor_k: f64,
    pub temperature: ConvergenceCriteria,
    pub field: FieldWait,
    pub channels: EngineChannels,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vti_offset_k: 5.0,
            vti_floor_k: VTI_FLOOR_K,
            temperature: ConvergenceCriteria::temperature(),
            field: FieldWait::default(),
            channels: EngineChannels::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.vti_offset_k.is_finite() {
            return Err(ConfigError::InvalidParameter {
                name: "VTI offset",
                value: self.vti_offset_k,
            });
        }
        if !self.vti_floor_k.is_finite() || self.vti_floor_k < 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "VTI floor",
                value: self.vti_floor_k,
            });
        }
        self.temperature.validate()?;
        if let FieldWait::Converge(criteria) = &self.field {
            criteria.validate()?;
        }
        Ok(())
    }

    pub fn vti_setpoint(&self, sample_k: f64) -> f64 {
        (sample_k - self.vti_offset_k).max(self.vti_floor_k)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Aborted,
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    Temperature,
    Field,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    Up,
    Down,
    Hold,
}

impl ScanDirection {
    fn between(previous: Option<f64>, target: f64) -> Self {
        match previous {
            Some(p) if target > p => ScanDirection::Up,
            Some(p) if target < p => ScanDirection::Down,
            _ => ScanDirection::Hold,
        }
    }
}

/// Called after each scan target has been commanded.
pub trait ScanCheck: Send {
    fn after_setpoint(&mut self, target_k: f64, direction: ScanDirection);
}

#[derive(Debug, Default)]
pub struct NoScanCheck;

impl ScanCheck for NoScanCheck {
    fn after_setpoint(&mut self, _target_k: f64, _direction: ScanDirection) {}
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RunFault {
    #[error("step {step}: {source}")]
    Hardware {
        step: usize,
        #[source]
        source: HardwareError,
    },
    #[error("step {step}: {quantity:?} did not reach {target} within {waited:?}")]
    ConvergenceTimeout {
        step: usize,
        quantity: Quantity,
        target: f64,
        waited: Duration,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    Aborted { step: usize },
    Faulted(RunFault),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        steps: usize,
    },
    StepStarted {
        index: usize,
        kind: &'static str,
    },
    SetpointCommanded {
        channel: ChannelKey,
        value: f64,
    },
    Converged {
        quantity: Quantity,
        target: f64,
        polls: u64,
    },
    Completed,
    Aborted {
        step: usize,
    },
    Faulted {
        fault: String,
    },
}

#[derive(Clone, Default, Debug, PartialEq, Serialize)]
pub struct RunStats {
    pub steps_executed: u64,
    pub setpoints_commanded: u64,
    pub convergence_polls: u64,
    pub delays_observed: u64,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub state: RunState,
    pub stats: RunStats,
}

/// Why step execution stopped early.
enum Interrupt {
    Cancelled,
    Fault(RunFault),
}

/// Disables the setpoint controls for as long as it lives.
struct ControlsLocked<'a, S: ControlSurface> {
    controls: &'a mut S,
}

impl<'a, S: ControlSurface> ControlsLocked<'a, S> {
    fn engage(controls: &'a mut S) -> Self {
        controls.set_controls_enabled(false);
        Self { controls }
    }
}

impl<S: ControlSurface> Drop for ControlsLocked<'_, S> {
    fn drop(&mut self) {
        self.controls.set_controls_enabled(true);
    }
}

/// Runs one measurement sequence. A new engine is built for every run.
pub struct SequenceEngine<IO: RigIO, S: ControlSurface, C: Clock = SystemClock> {
    worker: Worker<IO, C>,
    controls: S,
    sequence: Sequence<Validated>,
}

struct Worker<IO: RigIO, C: Clock> {
    io: IO,
    clock: C,
    telemetry: Arc<TelemetryStore>,
    config: EngineConfig,
    token: CancellationToken,
    scan_check: Box<dyn ScanCheck>,
    events: Option<Sender<RunEvent>>,
    state: RunState,
    step: usize,
    stats: RunStats,
}

impl<IO: RigIO, S: ControlSurface, C: Clock> SequenceEngine<IO, S, C> {
    pub fn new(
        io: IO,
        controls: S,
        clock: C,
        telemetry: Arc<TelemetryStore>,
        config: EngineConfig,
        sequence: Sequence<Validated>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            worker: Worker {
                io,
                clock,
                telemetry,
                config,
                token: CancellationToken::new(),
                scan_check: Box::new(NoScanCheck),
                events: None,
                state: RunState::Idle,
                step: 0,
                stats: RunStats::default(),
            },
            controls,
            sequence,
        })
    }

    pub fn with_events(mut self, events: Sender<RunEvent>) -> Self {
        self.worker.events = Some(events);
        self
    }

    pub fn with_scan_check(mut self, check: impl ScanCheck + 'static) -> Self {
        self.worker.scan_check = Box::new(check);
        self
    }

    /// Handle for requesting a stop from another thread.
    pub fn stop_handle(&self) -> CancellationToken {
        self.worker.token.clone()
    }

    /// Requests a stop; does not wait for the worker.
    pub fn stop(&self) {
        self.worker.token.request_stop();
    }

    pub fn state(&self) -> RunState {
        self.worker.state
    }

    /// Executes every step in order, unless stopped or faulted first.
    pub fn run(self) -> RunReport {
        let SequenceEngine {
            mut worker,
            mut controls,
            sequence,
        } = self;

        let outcome = {
            let _locked = ControlsLocked::engage(&mut controls);
            worker.enter(RunState::Running);
            worker.emit(RunEvent::Started {
                steps: sequence.len(),
            });

            match worker.execute(&sequence) {
                Ok(()) => {
                    log::info!("sequence completed ({} steps)", sequence.len());
                    worker.enter(RunState::Completed);
                    worker.emit(RunEvent::Completed);
                    RunOutcome::Completed
                }
                Err(Interrupt::Cancelled) => {
                    let step = worker.step;
                    log::warn!("sequence aborted at step {step}");
                    worker.enter(RunState::Aborted);
                    worker.emit(RunEvent::Aborted { step });
                    RunOutcome::Aborted { step }
                }
                Err(Interrupt::Fault(fault)) => {
                    log::error!("sequence faulted: {fault}");
                    worker.enter(RunState::Faulted);
                    worker.emit(RunEvent::Faulted {
                        fault: fault.to_string(),
                    });
                    RunOutcome::Faulted(fault)
                }
            }
        };

        RunReport {
            outcome,
            state: worker.state,
            stats: worker.stats,
        }
    }
}

impl<IO: RigIO, C: Clock> Worker<IO, C> {
    fn enter(&mut self, state: RunState) {
        log::debug!("run state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            // Nobody listening is fine.
            let _ = events.send(event);
        }
    }

    fn checkpoint(&self) -> Result<(), Interrupt> {
        if self.token.is_stopped() {
            Err(Interrupt::Cancelled)
        } else {
            Ok(())
        }
    }

    fn execute(&mut self, sequence: &Sequence<Validated>) -> Result<(), Interrupt> {
        for (index, step) in sequence.steps().iter().enumerate() {
            self.step = index;
            self.checkpoint()?;
            log::info!("step {index}: {}", step.kind());
            self.emit(RunEvent::StepStarted {
                index,
                kind: step.kind(),
            });

            match step {
                SequenceStep::ScanTemperature { targets } => self.scan(targets)?,
                SequenceStep::Wait {
                    target_temp_k,
                    target_field_t,
                    delay_s,
                } => self.wait(*target_temp_k, *target_field_t, *delay_s)?,
            }
            self.stats.steps_executed += 1;
        }
        Ok(())
    }

    fn scan(&mut self, targets: &[f64]) -> Result<(), Interrupt> {
        let channels = self.config.channels.clone();
        let mut previous = None;
        for &target in targets {
            self.checkpoint()?;
            let vti = self.config.vti_setpoint(target);
            self.command(&channels.vti_setpoint, vti)?;
            self.command(&channels.sample_setpoint, target)?;

            let direction = ScanDirection::between(previous, target);
            self.scan_check.after_setpoint(target, direction);
            previous = Some(target);
        }
        Ok(())
    }

    fn wait(&mut self, temp_k: f64, field_t: f64, delay_s: f64) -> Result<(), Interrupt> {
        let channels = self.config.channels.clone();
        let temperature = self.config.temperature;
        self.converge(
            Quantity::Temperature,
            &channels.sample_temperature,
            temp_k,
            &temperature,
        )?;

        match self.config.field.clone() {
            FieldWait::Unverified { settle } => {
                self.checkpoint()?;
                log::warn!("field target {field_t} T not verified; field convergence is disabled");
                self.clock.sleep(settle);
            }
            FieldWait::Converge(criteria) => {
                self.converge(Quantity::Field, &channels.field, field_t, &criteria)?;
            }
        }

        self.checkpoint()?;
        let delay = Duration::try_from_secs_f64(delay_s).unwrap_or(Duration::ZERO);
        log::debug!("holding for {delay:?}");
        self.clock.sleep(delay);
        self.stats.delays_observed += 1;
        Ok(())
    }

    fn converge(
        &mut self,
        quantity: Quantity,
        channel: &ChannelKey,
        target: f64,
        criteria: &ConvergenceCriteria,
    ) -> Result<(), Interrupt> {
        let telemetry = &self.telemetry;
        let report = wait_until(
            || telemetry.read(channel),
            target,
            criteria,
            &self.token,
            &self.clock,
        );
        self.stats.convergence_polls += report.polls;

        match report.outcome {
            WaitOutcome::Converged => {
                self.emit(RunEvent::Converged {
                    quantity,
                    target,
                    polls: report.polls,
                });
                Ok(())
            }
            WaitOutcome::Cancelled => Err(Interrupt::Cancelled),
            WaitOutcome::TimedOut => Err(Interrupt::Fault(RunFault::ConvergenceTimeout {
                step: self.step,
                quantity,
                target,
                waited: report.waited,
            })),
        }
    }

    fn command(&mut self, channel: &ChannelKey, value: f64) -> Result<(), Interrupt> {
        let step = self.step;
        let fault = |source| Interrupt::Fault(RunFault::Hardware { step, source });
        tolerate_benign(self.io.prepare_setpoint(channel, value)).map_err(fault)?;
        tolerate_benign(self.io.commit_setpoint(channel)).map_err(fault)?;
        self.stats.setpoints_commanded += 1;
        log::debug!("{channel} <- {value}");
        self.emit(RunEvent::SetpointCommanded {
            channel: channel.clone(),
            value,
        });
        Ok(())
    }
}
