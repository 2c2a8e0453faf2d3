//! Operator-triggered single resistance measurement.

use cryo_core::{
    measure, CancellationToken, ChannelKey, MeasurementConfig, MeasurementError,
    MeasurementResult, RigIO,
};
use std::sync::mpsc::Sender;
use tracing::{info, warn};

/// Holds the measurement settings between triggers and publishes each
/// result to a single sink.
pub struct OneShotRunner {
    config: MeasurementConfig,
    results: Sender<MeasurementResult>,
}

impl OneShotRunner {
    pub fn new(config: MeasurementConfig, results: Sender<MeasurementResult>) -> Self {
        Self { config, results }
    }

    pub fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    pub fn update_applied_current(&mut self, current_a: f64) {
        self.config.applied_current_a = Some(current_a);
    }

    pub fn update_sample_count(&mut self, sample_count: u32) {
        self.config.sample_count = sample_count;
    }

    pub fn update_channels(&mut self, voltage: ChannelKey, current: ChannelKey) {
        self.config.resistance_channel = Some(voltage);
        self.config.current_channel = Some(current);
    }

    /// Measures once and sends the result. A closed receiver is logged and
    /// otherwise ignored.
    pub fn measure_oneshot<IO: RigIO + ?Sized>(
        &self,
        io: &mut IO,
        token: &CancellationToken,
    ) -> Result<MeasurementResult, MeasurementError> {
        let result = measure(io, &self.config, token)?;
        info!(
            r_mean_ohm = result.r_mean_ohm,
            r_std_ohm = result.r_std_ohm,
            t_mean_k = result.t_mean_k,
            "Resistance measured"
        );
        if self.results.send(result).is_err() {
            warn!("Measurement result receiver closed; result dropped");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryo_core::{tags, ConfigError, RigOp, SimulatedRig};
    use std::sync::mpsc;

    fn runner() -> (OneShotRunner, mpsc::Receiver<MeasurementResult>) {
        let (tx, rx) = mpsc::channel();
        let mut runner = OneShotRunner::new(MeasurementConfig::default(), tx);
        runner.update_channels(tags::SAMPLE_VOLTAGE_V.key(), tags::SOURCE_CURRENT_A.key());
        (runner, rx)
    }

    #[test]
    fn publishes_exactly_once() {
        let (mut runner, rx) = runner();
        runner.update_applied_current(1e-3);
        runner.update_sample_count(4);

        let mut rig = SimulatedRig::new();
        rig.set_sample_resistance(250.0);
        rig.set_offset_voltage(2e-3);

        let result = runner
            .measure_oneshot(&mut rig, &CancellationToken::new())
            .unwrap();
        assert!((result.r_mean_ohm - 250.0).abs() < 1e-9);

        let published: Vec<_> = rx.try_iter().collect();
        assert_eq!(published, vec![result]);
    }

    #[test]
    fn missing_current_fails_before_hardware() {
        let (runner, rx) = runner();
        let mut rig = SimulatedRig::new();

        let err = runner
            .measure_oneshot(&mut rig, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(
            err,
            MeasurementError::Config(ConfigError::MissingAppliedCurrent)
        );
        assert!(rig.commands().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_receiver_is_not_an_error() {
        let (mut runner, rx) = runner();
        drop(rx);
        runner.update_applied_current(1e-4);

        let mut rig = SimulatedRig::new();
        assert!(runner
            .measure_oneshot(&mut rig, &CancellationToken::new())
            .is_ok());
        assert_eq!(rig.commands().last(), Some(&RigOp::ResumeLoops));
    }
}
