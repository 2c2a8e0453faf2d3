pub mod cancel;
pub mod clock;
pub mod engine;
pub mod error;
pub mod hal;
#[cfg(feature = "simulation")]
pub mod hal_sim;
pub mod measurement;
pub mod sequence;
pub mod tags;
pub mod telemetry;
pub mod waiter;

pub use cancel::CancellationToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{
    EngineChannels, EngineConfig, FieldWait, NoScanCheck, Quantity, RunEvent, RunFault,
    RunOutcome, RunReport, RunState, RunStats, ScanCheck, ScanDirection, SequenceEngine,
    VTI_FLOOR_K,
};
pub use error::{ConfigError, HardwareError};
pub use hal::{ControlSurface, ControlsFlag, RigIO};
#[cfg(feature = "simulation")]
pub use hal_sim::{RecordingControls, RigOp, SimulatedRig};
pub use measurement::{measure, MeasurementConfig, MeasurementError, MeasurementResult};
pub use sequence::{Sequence, SequenceLimits, SequenceStep, SequenceViolation, Unvalidated, Validated};
pub use telemetry::{ChannelKey, TelemetryStore};
pub use waiter::{wait_until, ConvergenceCriteria, WaitOutcome, WaitReport};
