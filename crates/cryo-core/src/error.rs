use thiserror::Error;

/// Faults reported by instrument drivers and their transport.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HardwareError {
    /// Read timed out with nothing pending on the bus.
    #[error("{device}: timed out waiting for data")]
    Timeout { device: String },
    #[error("{device}: transport failure: {message}")]
    Transport { device: String, message: String },
    #[error("{device}: device error: {message}")]
    Device { device: String, message: String },
}

impl HardwareError {
    /// The "no data pending" signature. After a write it only means the
    /// instrument had nothing to say.
    pub fn is_benign(&self) -> bool {
        matches!(self, HardwareError::Timeout { .. })
    }
}

/// Swallows the benign timeout on write-type commands.
pub fn tolerate_benign(result: Result<(), HardwareError>) -> Result<(), HardwareError> {
    match result {
        Err(err) if err.is_benign() => {
            log::debug!("ignoring benign instrument timeout: {err}");
            Ok(())
        }
        other => other,
    }
}

/// Invalid settings, detected before any instrument is touched.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("applied current is not set")]
    MissingAppliedCurrent,
    #[error("applied current must be finite and non-zero, got {value}")]
    InvalidAppliedCurrent { value: f64 },
    #[error("{role} channel is not set")]
    MissingChannel { role: &'static str },
    #[error("sample count must be at least 1")]
    InvalidSampleCount,
    #[error("{name} must be finite and non-negative, got {value}")]
    InvalidParameter { name: &'static str, value: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_swallowed() {
        let res = tolerate_benign(Err(HardwareError::Timeout {
            device: "ITC".into(),
        }));
        assert!(res.is_ok());
    }

    #[test]
    fn transport_failure_propagates() {
        let err = HardwareError::Transport {
            device: "IPS".into(),
            message: "GPIB bus error".into(),
        };
        assert_eq!(tolerate_benign(Err(err.clone())), Err(err));
    }
}
