use cryo_core::{MeasurementResult, RunStats, Sequence, SequenceStep, Unvalidated};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct FormatVersion {
    pub major: u8,
    pub minor: u8,
}

impl FormatVersion {
    pub const fn v1() -> Self {
        Self { major: 1, minor: 0 }
    }

    pub fn is_supported(&self) -> bool {
        self.major == 1
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed sequence document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported sequence format {}.{}", .0.major, .0.minor)]
    UnsupportedVersion(FormatVersion),
}

/// Versioned form of a sequence file. A bare JSON array of steps is also
/// accepted and read as version 1.0.
#[derive(Debug, Deserialize)]
struct VersionedDocument {
    #[serde(default = "FormatVersion::v1")]
    version: FormatVersion,
    steps: Vec<SequenceStep>,
}

#[derive(Debug, Clone)]
pub struct SequenceDocument {
    pub version: FormatVersion,
    pub steps: Vec<SequenceStep>,
}

impl SequenceDocument {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let (version, steps) = if value.is_array() {
            (FormatVersion::v1(), serde_json::from_value(value)?)
        } else {
            let doc: VersionedDocument = serde_json::from_value(value)?;
            (doc.version, doc.steps)
        };
        if !version.is_supported() {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        Ok(Self { version, steps })
    }

    pub fn into_sequence(self) -> Sequence<Unvalidated> {
        Sequence::new(self.steps)
    }
}

/// One published measurement, as written to result sinks.
#[derive(Debug, Serialize)]
pub struct ResultMsg {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub sequence: u64,
    pub unix_us: u64,
    pub applied_current_a: f64,
    pub sample_count: u32,
    #[serde(flatten)]
    pub result: MeasurementResult,
}

impl ResultMsg {
    pub fn new(
        sequence: u64,
        unix_us: u64,
        applied_current_a: f64,
        sample_count: u32,
        result: MeasurementResult,
    ) -> Self {
        Self {
            msg_type: "measurement",
            sequence,
            unix_us,
            applied_current_a,
            sample_count,
            result,
        }
    }
}

/// Final summary of one sequence run.
#[derive(Debug, Serialize)]
pub struct RunSummaryMsg<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub outcome: &'a str,
    pub detail: Option<String>,
    #[serde(flatten)]
    pub stats: &'a RunStats,
}

impl<'a> RunSummaryMsg<'a> {
    pub fn new(outcome: &'a str, detail: Option<String>, stats: &'a RunStats) -> Self {
        Self {
            msg_type: "run_summary",
            outcome,
            detail,
            stats,
        }
    }
}
