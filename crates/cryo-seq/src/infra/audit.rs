//! Audit trail of sequence runs.
//!
//! Every run transition and every published measurement is appended to a
//! JSONL file so a cooldown can be reconstructed after the fact.

use cryo_core::RunEvent;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Types of events that are logged in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Process startup
    SystemStart,
    /// Sequence worker entered Running
    RunStarted,
    /// A step began executing
    StepStarted,
    /// A setpoint was prepared and committed
    SetpointCommanded,
    /// A waited-on quantity converged
    Converged,
    /// Every step executed
    RunCompleted,
    /// Operator stop observed
    RunAborted,
    /// Hardware fault or convergence timeout
    RunFaulted,
    /// One-shot resistance measurement published
    MeasurementPublished,
    /// Process shutdown
    SystemShutdown,
}

impl AuditEventType {
    pub fn for_run_event(event: &RunEvent) -> Self {
        match event {
            RunEvent::Started { .. } => AuditEventType::RunStarted,
            RunEvent::StepStarted { .. } => AuditEventType::StepStarted,
            RunEvent::SetpointCommanded { .. } => AuditEventType::SetpointCommanded,
            RunEvent::Converged { .. } => AuditEventType::Converged,
            RunEvent::Completed => AuditEventType::RunCompleted,
            RunEvent::Aborted { .. } => AuditEventType::RunAborted,
            RunEvent::Faulted { .. } => AuditEventType::RunFaulted,
        }
    }
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic timestamp in microseconds
    pub timestamp_us: u64,
    /// Wall-clock Unix timestamp in microseconds
    pub unix_us: u64,
    pub event_type: AuditEventType,
    pub details: serde_json::Value,
}

/// Thread-safe audit logger that writes to a JSONL file
pub struct AuditLogger {
    writer: Mutex<BufWriter<File>>,
}

impl AuditLogger {
    /// Opens `path` in append mode, creating parent directories.
    pub fn new(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::with_capacity(8192, file)),
        })
    }

    pub fn log(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        serde_json::to_writer(&mut *writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    pub fn log_event(
        &self,
        timestamp_us: u64,
        unix_us: u64,
        event_type: AuditEventType,
        details: serde_json::Value,
    ) -> std::io::Result<()> {
        self.log(&AuditEntry {
            timestamp_us,
            unix_us,
            event_type,
            details,
        })
    }

    /// Records a sequence worker event with the event itself as details.
    pub fn log_run_event(
        &self,
        timestamp_us: u64,
        unix_us: u64,
        event: &RunEvent,
    ) -> std::io::Result<()> {
        self.log_event(
            timestamp_us,
            unix_us,
            AuditEventType::for_run_event(event),
            serde_json::to_value(event)?,
        )
    }
}
