use super::error::RuntimeError;
use cryo_core::{
    tags, ConvergenceCriteria, EngineConfig, FieldWait, MeasurementConfig, VTI_FLOOR_K,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub sequence_path: Option<PathBuf>,
    pub stop_after: Option<Duration>,

    // Engine
    pub vti_offset_k: f64,
    pub temp_threshold_k: f64,
    pub field_threshold_t: f64,
    pub verify_field: bool,
    pub poll_interval: Duration,
    /// Overrides both convergence timeouts; zero waits forever.
    pub wait_timeout: Option<Duration>,

    // One-shot measurement
    pub measure: bool,
    pub current_a: Option<f64>,
    pub samples: u32,

    // Simulated rig
    /// Thermal time constant; zero makes setpoints take effect on commit.
    pub sim_tau_s: f64,
    pub sim_resistance_ohm: f64,
    pub sim_offset_voltage_v: f64,
    pub telemetry_interval: Duration,

    // Observability
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub audit_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let temperature = ConvergenceCriteria::temperature();
        Self {
            show_help: false,
            sequence_path: None,
            stop_after: None,
            vti_offset_k: 5.0,
            temp_threshold_k: temperature.threshold,
            field_threshold_t: ConvergenceCriteria::field().threshold,
            verify_field: false,
            poll_interval: temperature.poll_interval,
            wait_timeout: None,
            measure: false,
            current_a: None,
            samples: MeasurementConfig::default().sample_count,
            sim_tau_s: 30.0,
            sim_resistance_ohm: 100.0,
            sim_offset_voltage_v: 0.0,
            telemetry_interval: Duration::from_millis(50),
            json_logs: false,
            log_dir: None,
            metrics_addr: None,
            audit_path: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, RuntimeError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Result<Self, RuntimeError> {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--sequence" => cfg.sequence_path = Some(value::<PathBuf>(args, &mut i, flag)?),
                "--stop-after" => cfg.stop_after = Some(seconds(args, &mut i, flag)?),
                "--vti-offset" => cfg.vti_offset_k = value(args, &mut i, flag)?,
                "--temp-threshold" => cfg.temp_threshold_k = value(args, &mut i, flag)?,
                "--field-threshold" => cfg.field_threshold_t = value(args, &mut i, flag)?,
                "--verify-field" => cfg.verify_field = true,
                "--poll-ms" => cfg.poll_interval = millis(args, &mut i, flag)?,
                "--wait-timeout" => cfg.wait_timeout = Some(seconds(args, &mut i, flag)?),
                "--measure" => cfg.measure = true,
                "--current" => cfg.current_a = Some(value(args, &mut i, flag)?),
                "--samples" => cfg.samples = value(args, &mut i, flag)?,
                "--sim-tau" => cfg.sim_tau_s = seconds(args, &mut i, flag)?.as_secs_f64(),
                "--sim-resistance" => cfg.sim_resistance_ohm = value(args, &mut i, flag)?,
                "--sim-offset-voltage" => cfg.sim_offset_voltage_v = value(args, &mut i, flag)?,
                "--telemetry-ms" => cfg.telemetry_interval = millis(args, &mut i, flag)?,
                "--json-logs" => cfg.json_logs = true,
                "--log-dir" => cfg.log_dir = Some(value::<PathBuf>(args, &mut i, flag)?),
                "--metrics-addr" => cfg.metrics_addr = Some(value(args, &mut i, flag)?),
                "--audit-log" => cfg.audit_path = Some(value::<PathBuf>(args, &mut i, flag)?),
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                other => return Err(RuntimeError::UnknownArgument(other.to_string())),
            }
            i += 1;
        }

        if !cfg.show_help && cfg.sequence_path.is_none() && !cfg.measure {
            return Err(RuntimeError::NothingToDo);
        }
        Ok(cfg)
    }

    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        let timeout = self
            .wait_timeout
            .map(|t| if t.is_zero() { None } else { Some(t) });

        let mut temperature = defaults.temperature;
        temperature.threshold = self.temp_threshold_k;
        temperature.poll_interval = self.poll_interval;
        if let Some(timeout) = timeout {
            temperature.timeout = timeout;
        }

        let field = if self.verify_field {
            let mut criteria = ConvergenceCriteria::field();
            criteria.threshold = self.field_threshold_t;
            criteria.poll_interval = self.poll_interval;
            if let Some(timeout) = timeout {
                criteria.timeout = timeout;
            }
            FieldWait::Converge(criteria)
        } else {
            FieldWait::Unverified {
                settle: self.poll_interval,
            }
        };

        EngineConfig {
            vti_offset_k: self.vti_offset_k,
            vti_floor_k: VTI_FLOOR_K,
            temperature,
            field,
            ..defaults
        }
    }

    pub fn measurement_config(&self) -> MeasurementConfig {
        MeasurementConfig {
            resistance_channel: Some(tags::SAMPLE_VOLTAGE_V.key()),
            current_channel: Some(tags::SOURCE_CURRENT_A.key()),
            applied_current_a: self.current_a,
            sample_count: self.samples,
            ..MeasurementConfig::default()
        }
    }

    pub fn print_help() {
        println!(
            r#"CryoSeq - Measurement sequence runner for cryostat rigs

USAGE:
    cryo-seq --sequence <PATH> [OPTIONS]
    cryo-seq --measure --current <A> [OPTIONS]

SEQUENCE:
    --sequence <PATH>           JSON sequence file (step array or versioned document)
    --stop-after <SECS>         Request a stop after this many seconds
    --vti-offset <K>            Sample-to-VTI setpoint offset [default: 5.0]
    --temp-threshold <K>        Temperature convergence threshold [default: 0.01]
    --field-threshold <T>       Field convergence threshold [default: 0.1]
    --verify-field              Wait for the live field reading to converge
    --poll-ms <MS>              Convergence poll interval [default: 100]
    --wait-timeout <SECS>       Convergence timeout, 0 waits forever [default: 4 h / 1 h]

MEASUREMENT:
    --measure                   Run one current-reversal resistance measurement
    --current <A>               Applied current (required with --measure)
    --samples <N>               Reversal pairs per measurement [default: 10]

SIMULATION:
    --sim-tau <SECS>            Thermal time constant, 0 for instant [default: 30]
    --sim-resistance <OHM>      Simulated sample resistance [default: 100]
    --sim-offset-voltage <V>    Simulated thermal offset voltage [default: 0]
    --telemetry-ms <MS>         Telemetry poll interval [default: 50]

OBSERVABILITY:
    --json-logs                 Output logs in JSON format (for log aggregation)
    --log-dir <DIR>             Also write JSON logs to a daily rolling file in DIR
    --metrics-addr <ADDR>       Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --audit-log <PATH>          Enable audit logging to specified JSONL file
    -h, --help                  Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                    Set log filter (e.g., RUST_LOG=debug,cryo_core=trace)

EXAMPLES:
    # Run a sequence against a fast simulated rig
    cryo-seq --sequence cooldown.json --sim-tau 2

    # Production-style run with all observability
    cryo-seq --sequence cooldown.json --json-logs --metrics-addr 0.0.0.0:9090 --audit-log /var/log/cryoseq/audit.jsonl

    # Single resistance measurement
    cryo-seq --measure --current 1e-4 --samples 20
"#
        );
    }
}

fn value<T: FromStr>(args: &[String], i: &mut usize, flag: &str) -> Result<T, RuntimeError> {
    *i += 1;
    let raw = args.get(*i).ok_or_else(|| RuntimeError::MissingValue {
        flag: flag.to_string(),
    })?;
    raw.parse().map_err(|_| RuntimeError::InvalidValue {
        flag: flag.to_string(),
        value: raw.clone(),
    })
}

fn seconds(args: &[String], i: &mut usize, flag: &str) -> Result<Duration, RuntimeError> {
    let secs: f64 = value(args, i, flag)?;
    Duration::try_from_secs_f64(secs).map_err(|_| RuntimeError::InvalidValue {
        flag: flag.to_string(),
        value: secs.to_string(),
    })
}

fn millis(args: &[String], i: &mut usize, flag: &str) -> Result<Duration, RuntimeError> {
    value::<u64>(args, i, flag).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<RuntimeConfig, RuntimeError> {
        let args: Vec<String> = std::iter::once("cryo-seq")
            .chain(line.split_whitespace())
            .map(String::from)
            .collect();
        RuntimeConfig::from_args(&args)
    }

    #[test]
    fn parses_sequence_run() {
        let cfg = parse("--sequence run.json --stop-after 1.5 --vti-offset 3 --poll-ms 20").unwrap();
        assert_eq!(cfg.sequence_path, Some(PathBuf::from("run.json")));
        assert_eq!(cfg.stop_after, Some(Duration::from_millis(1500)));

        let engine = cfg.engine_config();
        assert_eq!(engine.vti_offset_k, 3.0);
        assert_eq!(engine.temperature.poll_interval, Duration::from_millis(20));
        assert_eq!(engine.temperature.threshold, 0.01);
        assert!(matches!(engine.field, FieldWait::Unverified { .. }));
    }

    #[test]
    fn verify_field_selects_convergence() {
        let cfg = parse("--sequence s.json --verify-field --field-threshold 0.05 --wait-timeout 0")
            .unwrap();
        match cfg.engine_config().field {
            FieldWait::Converge(criteria) => {
                assert_eq!(criteria.threshold, 0.05);
                assert_eq!(criteria.timeout, None);
            }
            other => panic!("expected field convergence, got {other:?}"),
        }
        assert_eq!(cfg.engine_config().temperature.timeout, None);
    }

    #[test]
    fn default_timeouts_are_kept() {
        let cfg = parse("--sequence s.json").unwrap();
        assert_eq!(
            cfg.engine_config().temperature.timeout,
            ConvergenceCriteria::temperature().timeout
        );
    }

    #[test]
    fn measurement_flags_fill_config() {
        let cfg = parse("--measure --current 1e-4 --samples 3").unwrap();
        let measurement = cfg.measurement_config();
        assert_eq!(measurement.applied_current_a, Some(1e-4));
        assert_eq!(measurement.sample_count, 3);
        assert!(measurement.validate().is_ok());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            parse("--sequence"),
            Err(RuntimeError::MissingValue { .. })
        ));
        assert!(matches!(
            parse("--sequence s.json --stop-after -1"),
            Err(RuntimeError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse("--sequence s.json --bogus"),
            Err(RuntimeError::UnknownArgument(_))
        ));
        assert!(matches!(parse(""), Err(RuntimeError::NothingToDo)));
    }

    #[test]
    fn help_short_circuits() {
        let cfg = parse("--help --bogus").unwrap();
        assert!(cfg.show_help);
    }
}
