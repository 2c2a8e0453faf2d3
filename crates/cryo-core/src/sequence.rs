use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "typ")]
pub enum SequenceStep {
    /// Sweep the sample stage through `targets`, in order.
    #[serde(rename = "scan_T")]
    ScanTemperature {
        #[serde(rename = "sequence_temperature", alias = "targets")]
        targets: Vec<f64>,
    },
    /// Wait for temperature, then field, then hold for `delay_s`.
    #[serde(rename = "Wait")]
    Wait {
        #[serde(rename = "Temp")]
        target_temp_k: f64,
        #[serde(rename = "Field")]
        target_field_t: f64,
        #[serde(rename = "Delay")]
        delay_s: f64,
    },
}

impl SequenceStep {
    pub fn kind(&self) -> &'static str {
        match self {
            SequenceStep::ScanTemperature { .. } => "scan_T",
            SequenceStep::Wait { .. } => "Wait",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Unvalidated;

#[derive(Debug, Clone, Copy)]
pub struct Validated;

/// Ordered steps of one run. Steps cannot be changed after construction.
#[derive(Debug, Clone)]
pub struct Sequence<State = Unvalidated> {
    steps: Vec<SequenceStep>,
    _state: PhantomData<State>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceLimits {
    pub min_temp_k: f64,
    pub max_temp_k: f64,
    pub max_field_t: f64,
    pub max_delay: Duration,
}

impl Default for SequenceLimits {
    fn default() -> Self {
        Self {
            min_temp_k: 1.5,
            max_temp_k: 400.0,
            max_field_t: 14.0,
            max_delay: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum SequenceViolation {
    #[error("step {step}: non-finite value {value}")]
    NonFinite { step: usize, value: f64 },
    #[error("step {step}: temperature {requested} K outside [{min}, {max}] K")]
    TemperatureOutOfRange {
        step: usize,
        requested: f64,
        min: f64,
        max: f64,
    },
    #[error("step {step}: field {requested} T exceeds {limit} T")]
    FieldOutOfRange {
        step: usize,
        requested: f64,
        limit: f64,
    },
    #[error("step {step}: delay {delay_s} s is negative or too long")]
    InvalidDelay { step: usize, delay_s: f64 },
}

impl Sequence<Unvalidated> {
    pub fn new(steps: Vec<SequenceStep>) -> Self {
        Self {
            steps,
            _state: PhantomData,
        }
    }

    pub fn validate(
        self,
        limits: &SequenceLimits,
    ) -> Result<Sequence<Validated>, SequenceViolation> {
        for (step, entry) in self.steps.iter().enumerate() {
            match entry {
                SequenceStep::ScanTemperature { targets } => {
                    for &t in targets {
                        check_temperature(step, t, limits)?;
                    }
                }
                SequenceStep::Wait {
                    target_temp_k,
                    target_field_t,
                    delay_s,
                } => {
                    check_temperature(step, *target_temp_k, limits)?;
                    check_finite(step, *target_field_t)?;
                    if target_field_t.abs() > limits.max_field_t {
                        return Err(SequenceViolation::FieldOutOfRange {
                            step,
                            requested: *target_field_t,
                            limit: limits.max_field_t,
                        });
                    }
                    check_finite(step, *delay_s)?;
                    match Duration::try_from_secs_f64(*delay_s) {
                        Ok(delay) if delay <= limits.max_delay => {}
                        _ => {
                            return Err(SequenceViolation::InvalidDelay {
                                step,
                                delay_s: *delay_s,
                            })
                        }
                    }
                }
            }
        }
        Ok(Sequence {
            steps: self.steps,
            _state: PhantomData,
        })
    }
}

impl<State> Sequence<State> {
    pub fn steps(&self) -> &[SequenceStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn check_finite(step: usize, value: f64) -> Result<(), SequenceViolation> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SequenceViolation::NonFinite { step, value })
    }
}

fn check_temperature(
    step: usize,
    requested: f64,
    limits: &SequenceLimits,
) -> Result<(), SequenceViolation> {
    check_finite(step, requested)?;
    if requested < limits.min_temp_k || requested > limits.max_temp_k {
        return Err(SequenceViolation::TemperatureOutOfRange {
            step,
            requested,
            min: limits.min_temp_k,
            max: limits.max_temp_k,
        });
    }
    Ok(())
}
