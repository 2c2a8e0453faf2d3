use cryo_core::{tags, CancellationToken, SimulatedRig, TelemetryStore};
use cryo_io::metrics::{
    init_metrics, serve_metrics, MAGNET_FIELD_T, SAMPLE_RESISTANCE_OHM, SAMPLE_TEMP_K,
    VTI_TEMP_K,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub fn init() {
    init_metrics();
}

pub fn start_metrics_server(addr: &Option<String>) -> Option<thread::JoinHandle<()>> {
    addr.as_ref().map(|addr| {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone())
    })
}

/// Advances the simulated rig in real time and publishes its readings into
/// the shared store, until `stop` is requested.
pub fn start_rig_poller(
    rig: SimulatedRig,
    store: Arc<TelemetryStore>,
    interval: Duration,
    stop: CancellationToken,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        debug!(interval_ms = interval.as_millis() as u64, "Rig poller started");
        let mut last = Instant::now();
        while !stop.is_stopped() {
            let now = Instant::now();
            rig.step(now.duration_since(last).as_secs_f64());
            last = now;
            rig.publish(&store);
            thread::sleep(interval);
        }
        debug!("Rig poller stopped");
    })
}

pub fn start_metrics_updater(
    store: Arc<TelemetryStore>,
    stop: CancellationToken,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.is_stopped() {
            let gauges = [
                (tags::SAMPLE_TEMP_K, &*SAMPLE_TEMP_K),
                (tags::VTI_TEMP_K, &*VTI_TEMP_K),
                (tags::MAGNET_FIELD_T, &*MAGNET_FIELD_T),
                (tags::SAMPLE_RESISTANCE_OHM, &*SAMPLE_RESISTANCE_OHM),
            ];
            for (tag, gauge) in gauges {
                if let Some(value) = store.read(&tag.key()) {
                    gauge.set(value);
                }
            }
            thread::sleep(Duration::from_millis(200));
        }
    })
}
