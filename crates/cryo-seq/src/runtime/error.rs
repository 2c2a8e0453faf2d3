use cryo_core::{ConfigError, MeasurementError, SequenceViolation};
use cryo_io::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("missing value for {flag}")]
    MissingValue { flag: String },
    #[error("invalid value {value:?} for {flag}")]
    InvalidValue { flag: String, value: String },
    #[error("unknown argument {0:?} (see --help)")]
    UnknownArgument(String),
    #[error("nothing to do: pass --sequence <PATH> and/or --measure")]
    NothingToDo,
    #[error("failed to read sequence {}: {source}", path.display())]
    ReadSequence {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("sequence rejected: {0}")]
    Sequence(#[from] SequenceViolation),
    #[error("engine configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Measurement(#[from] MeasurementError),
    #[error("audit log {}: {source}", path.display())]
    Audit {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("log directory: {0}")]
    LogDir(#[from] tracing_appender::rolling::InitError),
    #[error("failed to spawn sequence worker: {0}")]
    Spawn(std::io::Error),
    #[error("sequence worker panicked")]
    WorkerPanicked,
}
