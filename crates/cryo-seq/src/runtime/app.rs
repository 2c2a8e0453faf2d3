use crate::infra::audit::{AuditEventType, AuditLogger};
use crate::oneshot::OneShotRunner;
use crate::runtime::config::RuntimeConfig;
use crate::runtime::error::RuntimeError;
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use cryo_core::{
    tags, CancellationToken, ControlsFlag, RunEvent, RunOutcome, RunReport, ScanCheck,
    ScanDirection, Sequence, SequenceEngine, SequenceLimits, SimulatedRig, SystemClock,
    TelemetryStore, Validated,
};
use cryo_io::metrics::{MEASUREMENTS, MEASUREMENT_FAILURES, RUNS_STARTED, SEQUENCE_RUNNING};
use cryo_io::{record_run, ResultMsg, RunSummaryMsg, SequenceDocument};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Exit status of a run that was stopped on request.
const EXIT_ABORTED: u8 = 2;

pub fn run_from_args() -> Result<ExitCode, RuntimeError> {
    let config = RuntimeConfig::from_env()?;
    if config.show_help {
        RuntimeConfig::print_help();
        return Ok(ExitCode::SUCCESS);
    }
    run(config)
}

pub fn run(config: RuntimeConfig) -> Result<ExitCode, RuntimeError> {
    let _log_guard = init_tracing(config.json_logs, config.log_dir.as_deref())?;

    telemetry::init();
    let metrics_enabled = config.metrics_addr.is_some();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    let clock = SystemClock::new();
    let audit = init_audit_logger(config.audit_path.as_ref())?;
    audit_event(
        audit.as_deref(),
        &clock,
        AuditEventType::SystemStart,
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "sequence": config.sequence_path,
            "measure": config.measure,
            "metrics_enabled": metrics_enabled,
        }),
    );

    // Parse and check the sequence before touching the rig.
    let sequence = config
        .sequence_path
        .as_deref()
        .map(load_sequence)
        .transpose()?;

    let rig = build_rig(&config);
    let store = Arc::new(TelemetryStore::new());
    rig.publish(&store);

    let shutdown = CancellationToken::new();
    let poller = telemetry::start_rig_poller(
        rig.clone(),
        Arc::clone(&store),
        config.telemetry_interval,
        shutdown.clone(),
    );
    let updater = telemetry::start_metrics_updater(Arc::clone(&store), shutdown.clone());

    let result = run_workload(&config, &clock, audit.as_deref(), rig, &store, sequence);

    shutdown.request_stop();
    let _ = poller.join();
    let _ = updater.join();

    let detail = match &result {
        Ok(_) => None,
        Err(err) => Some(err.to_string()),
    };
    audit_event(
        audit.as_deref(),
        &clock,
        AuditEventType::SystemShutdown,
        serde_json::json!({ "error": detail }),
    );
    result
}

fn run_workload(
    config: &RuntimeConfig,
    clock: &SystemClock,
    audit: Option<&AuditLogger>,
    rig: SimulatedRig,
    store: &Arc<TelemetryStore>,
    sequence: Option<Sequence<Validated>>,
) -> Result<ExitCode, RuntimeError> {
    if let Some(sequence) = sequence {
        let report = run_sequence(config, clock, audit, rig.clone(), store, sequence)?;
        match report.outcome {
            RunOutcome::Completed => {}
            RunOutcome::Aborted { .. } => {
                if config.measure {
                    info!("Skipping measurement after aborted run");
                }
                return Ok(ExitCode::from(EXIT_ABORTED));
            }
            RunOutcome::Faulted(_) => return Ok(ExitCode::FAILURE),
        }
    }

    if config.measure {
        run_measurement(config, clock, audit, rig, store)?;
    }
    Ok(ExitCode::SUCCESS)
}

fn load_sequence(path: &Path) -> Result<Sequence<Validated>, RuntimeError> {
    let raw = std::fs::read_to_string(path).map_err(|source| RuntimeError::ReadSequence {
        path: path.to_path_buf(),
        source,
    })?;
    let document = SequenceDocument::parse(&raw)?;
    info!(
        path = %path.display(),
        steps = document.steps.len(),
        format_major = document.version.major,
        format_minor = document.version.minor,
        "Sequence loaded"
    );
    Ok(document
        .into_sequence()
        .validate(&SequenceLimits::default())?)
}

fn build_rig(config: &RuntimeConfig) -> SimulatedRig {
    let rig = if config.sim_tau_s > 0.0 {
        SimulatedRig::with_time_constant(config.sim_tau_s)
    } else {
        SimulatedRig::new()
    };
    rig.set_sample_resistance(config.sim_resistance_ohm);
    rig.set_offset_voltage(config.sim_offset_voltage_v);
    info!(
        tau_s = config.sim_tau_s,
        resistance_ohm = config.sim_resistance_ohm,
        "Using simulated rig"
    );
    rig
}

/// Logs each scan target with its direction.
struct TracedScan;

impl ScanCheck for TracedScan {
    fn after_setpoint(&mut self, target_k: f64, direction: ScanDirection) {
        debug!(target_k, ?direction, "Scan target commanded");
    }
}

fn run_sequence(
    config: &RuntimeConfig,
    clock: &SystemClock,
    audit: Option<&AuditLogger>,
    rig: SimulatedRig,
    store: &Arc<TelemetryStore>,
    sequence: Sequence<Validated>,
) -> Result<RunReport, RuntimeError> {
    let engine_config = config.engine_config();
    info!(
        steps = sequence.len(),
        vti_offset_k = engine_config.vti_offset_k,
        threshold_k = engine_config.temperature.threshold,
        "Starting sequence worker"
    );

    let controls = ControlsFlag::new();
    let (events_tx, events_rx) = mpsc::channel();
    let engine = SequenceEngine::new(
        rig,
        controls.clone(),
        SystemClock::new(),
        Arc::clone(store),
        engine_config,
        sequence,
    )?
    .with_events(events_tx)
    .with_scan_check(TracedScan);
    let stop = engine.stop_handle();

    RUNS_STARTED.inc();
    SEQUENCE_RUNNING.set(1.0);
    let worker = thread::Builder::new()
        .name("sequence".to_string())
        .spawn(move || engine.run())
        .map_err(RuntimeError::Spawn)?;

    // Forward events until the worker finishes and drops its sender.
    let mut deadline = config.stop_after.map(|after| Instant::now() + after);
    loop {
        let wait = deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_secs(3600));
        match events_rx.recv_timeout(wait) {
            Ok(event) => record_event(audit, clock, &event),
            Err(RecvTimeoutError::Timeout) => {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    warn!("Stop deadline reached, requesting stop");
                    stop.request_stop();
                    deadline = None;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let report = worker.join().map_err(|_| RuntimeError::WorkerPanicked)?;
    record_run(&report.outcome, &report.stats);
    if !controls.is_enabled() {
        error!("Controls still locked after run");
    }

    let (outcome, detail) = match &report.outcome {
        RunOutcome::Completed => ("completed", None),
        RunOutcome::Aborted { step } => ("aborted", Some(format!("stopped at step {step}"))),
        RunOutcome::Faulted(fault) => ("faulted", Some(fault.to_string())),
    };
    info!(
        outcome,
        steps_executed = report.stats.steps_executed,
        setpoints_commanded = report.stats.setpoints_commanded,
        convergence_polls = report.stats.convergence_polls,
        "Run finished"
    );
    emit_line(&RunSummaryMsg::new(outcome, detail, &report.stats));
    Ok(report)
}

fn record_event(audit: Option<&AuditLogger>, clock: &SystemClock, event: &RunEvent) {
    match event {
        RunEvent::StepStarted { index, kind } => info!(index, kind, "Step started"),
        RunEvent::SetpointCommanded { channel, value } => {
            debug!(channel = %channel, value, "Setpoint commanded")
        }
        RunEvent::Converged {
            quantity,
            target,
            polls,
        } => info!(?quantity, target, polls, "Converged"),
        RunEvent::Faulted { fault } => error!(fault = %fault, "Run faulted"),
        RunEvent::Aborted { step } => warn!(step, "Run aborted"),
        RunEvent::Started { .. } | RunEvent::Completed => debug!(?event, "Run event"),
    }

    if let Some(logger) = audit {
        if let Err(e) = logger.log_run_event(clock.now_us(), clock.unix_us(), event) {
            warn!(error = %e, "Failed to write audit entry");
        }
    }
}

fn run_measurement(
    config: &RuntimeConfig,
    clock: &SystemClock,
    audit: Option<&AuditLogger>,
    mut rig: SimulatedRig,
    store: &TelemetryStore,
) -> Result<(), RuntimeError> {
    let (results_tx, results_rx) = mpsc::channel();
    let runner = OneShotRunner::new(config.measurement_config(), results_tx);

    if let Err(e) = runner.measure_oneshot(&mut rig, &CancellationToken::new()) {
        MEASUREMENT_FAILURES.inc();
        return Err(e.into());
    }

    let measurement = runner.config();
    for (index, result) in results_rx.try_iter().enumerate() {
        MEASUREMENTS.inc();
        store.publish(&tags::SAMPLE_RESISTANCE_OHM.key(), result.r_mean_ohm);

        let msg = ResultMsg::new(
            index as u64,
            clock.unix_us(),
            measurement.applied_current_a.unwrap_or_default(),
            measurement.sample_count,
            result,
        );
        emit_line(&msg);
        audit_event(
            audit,
            clock,
            AuditEventType::MeasurementPublished,
            serde_json::to_value(&msg).unwrap_or_default(),
        );
    }
    Ok(())
}

/// Writes one result message to stdout as a JSON line.
fn emit_line<T: serde::Serialize>(msg: &T) {
    match serde_json::to_string(msg) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "Failed to encode result message"),
    }
}

fn audit_event(
    audit: Option<&AuditLogger>,
    clock: &SystemClock,
    event_type: AuditEventType,
    details: serde_json::Value,
) {
    if let Some(logger) = audit {
        if let Err(e) = logger.log_event(clock.now_us(), clock.unix_us(), event_type, details) {
            warn!(error = %e, "Failed to write audit entry");
        }
    }
}

fn init_audit_logger(audit_path: Option<&PathBuf>) -> Result<Option<Arc<AuditLogger>>, RuntimeError> {
    audit_path
        .map(|path| match AuditLogger::new(path) {
            Ok(logger) => {
                info!(path = %path.display(), "Audit logging enabled");
                Ok(Arc::new(logger))
            }
            Err(source) => Err(RuntimeError::Audit {
                path: path.clone(),
                source,
            }),
        })
        .transpose()
}
