pub mod metrics;
pub mod protocol;

pub use metrics::{init_metrics, record_run, serve_metrics};
pub use protocol::{FormatVersion, ProtocolError, ResultMsg, RunSummaryMsg, SequenceDocument};
