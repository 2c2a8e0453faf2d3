//! Prometheus metrics for CryoSeq observability.
//!
//! Counters cover sequence runs and the measurement routine; gauges mirror
//! the latest telemetry so a dashboard can follow a run.

use cryo_core::{tags, RunOutcome, RunStats};
use prometheus::{Encoder, Gauge, IntCounter, Registry, TextEncoder};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric name is valid");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric is registered once");
    counter
}

fn gauge(name: &str, help: &str) -> Gauge {
    let gauge = Gauge::new(name, help).expect("metric name is valid");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("metric is registered once");
    gauge
}

// ============================================================================
// Sequence Metrics
// ============================================================================

pub static RUNS_STARTED: LazyLock<IntCounter> =
    LazyLock::new(|| counter("cryoseq_runs_started_total", "Sequence runs started"));

pub static RUNS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "cryoseq_runs_completed_total",
        "Sequence runs that executed every step",
    )
});

pub static RUNS_ABORTED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "cryoseq_runs_aborted_total",
        "Sequence runs stopped on operator request",
    )
});

pub static RUNS_FAULTED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "cryoseq_runs_faulted_total",
        "Sequence runs ended by a hardware fault or convergence timeout",
    )
});

pub static SETPOINTS_COMMANDED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "cryoseq_setpoints_commanded_total",
        "Setpoints prepared and committed by the sequence worker",
    )
});

pub static CONVERGENCE_POLLS: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "cryoseq_convergence_polls_total",
        "Sleeps taken while waiting for a quantity to converge",
    )
});

// ============================================================================
// Measurement Metrics
// ============================================================================

pub static MEASUREMENTS: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "cryoseq_measurements_total",
        "Current-reversal resistance measurements published",
    )
});

pub static MEASUREMENT_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "cryoseq_measurement_failures_total",
        "Resistance measurements that failed or were cancelled",
    )
});

pub static SAMPLE_RESISTANCE_OHM: LazyLock<Gauge> = LazyLock::new(|| {
    gauge(
        tags::SAMPLE_RESISTANCE_OHM.metric,
        "Mean resistance of the last measurement in ohm",
    )
});

// ============================================================================
// Telemetry Gauges
// ============================================================================

pub static SAMPLE_TEMP_K: LazyLock<Gauge> = LazyLock::new(|| {
    gauge(
        tags::SAMPLE_TEMP_K.metric,
        "Sample stage temperature in kelvin",
    )
});

pub static VTI_TEMP_K: LazyLock<Gauge> =
    LazyLock::new(|| gauge(tags::VTI_TEMP_K.metric, "VTI temperature in kelvin"));

pub static MAGNET_FIELD_T: LazyLock<Gauge> =
    LazyLock::new(|| gauge(tags::MAGNET_FIELD_T.metric, "Magnet field in tesla"));

/// Sequence running (1) or idle (0)
pub static SEQUENCE_RUNNING: LazyLock<Gauge> = LazyLock::new(|| {
    gauge(
        "cryoseq_sequence_running",
        "Sequence worker status (1=running, 0=idle)",
    )
});

/// Folds a finished run into the counters.
pub fn record_run(outcome: &RunOutcome, stats: &RunStats) {
    match outcome {
        RunOutcome::Completed => RUNS_COMPLETED.inc(),
        RunOutcome::Aborted { .. } => RUNS_ABORTED.inc(),
        RunOutcome::Faulted(_) => RUNS_FAULTED.inc(),
    }
    SETPOINTS_COMMANDED.inc_by(stats.setpoints_commanded);
    CONVERGENCE_POLLS.inc_by(stats.convergence_polls);
    SEQUENCE_RUNNING.set(0.0);
}

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Start the metrics HTTP server on the given address.
/// Returns a join handle for the server thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            match request.url() {
                "/metrics" => {
                    let mut buffer = Vec::new();
                    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
                        tracing::warn!("Failed to encode metrics: {}", e);
                        let _ = request.respond(
                            Response::from_string("Internal Server Error").with_status_code(500),
                        );
                        continue;
                    }

                    let mut response = Response::from_data(buffer);
                    if let Ok(header) = tiny_http::Header::from_bytes(
                        &b"Content-Type"[..],
                        &b"text/plain; version=0.0.4"[..],
                    ) {
                        response = response.with_header(header);
                    }
                    let _ = request.respond(response);
                }
                "/health" => {
                    let _ = request.respond(Response::from_string("OK"));
                }
                "/ready" => {
                    // Ready once telemetry has been polled at least once
                    if SAMPLE_TEMP_K.get() > 0.0 {
                        let _ = request.respond(Response::from_string("Ready"));
                    } else {
                        let _ = request
                            .respond(Response::from_string("Not Ready").with_status_code(503));
                    }
                }
                _ => {
                    let _ =
                        request.respond(Response::from_string("Not Found").with_status_code(404));
                }
            }
        }
    })
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = RUNS_STARTED.get();
    let _ = RUNS_COMPLETED.get();
    let _ = RUNS_ABORTED.get();
    let _ = RUNS_FAULTED.get();
    let _ = SETPOINTS_COMMANDED.get();
    let _ = CONVERGENCE_POLLS.get();
    let _ = MEASUREMENTS.get();
    let _ = MEASUREMENT_FAILURES.get();
    let _ = SAMPLE_RESISTANCE_OHM.get();
    let _ = SAMPLE_TEMP_K.get();
    let _ = VTI_TEMP_K.get();
    let _ = MAGNET_FIELD_T.get();
    let _ = SEQUENCE_RUNNING.get();
}
