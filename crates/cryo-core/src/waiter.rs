//! Poll-and-compare wait for a physical quantity to reach its setpoint.

use crate::cancel::CancellationToken;
use crate::clock::Clock;
use crate::error::ConfigError;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceCriteria {
    /// Maximum allowed `|current - target|`.
    pub threshold: f64,
    pub poll_interval: Duration,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
}

impl ConvergenceCriteria {
    pub fn temperature() -> Self {
        Self {
            threshold: 0.01,
            poll_interval: Duration::from_millis(100),
            timeout: Some(Duration::from_secs(4 * 3600)),
        }
    }

    pub fn field() -> Self {
        Self {
            threshold: 0.1,
            poll_interval: Duration::from_millis(100),
            timeout: Some(Duration::from_secs(3600)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "convergence threshold",
                value: self.threshold,
            });
        }
        Ok(())
    }

    fn within(&self, current: Option<f64>, target: f64) -> bool {
        // NaN compares false, so a broken sensor never counts as converged.
        current.is_some_and(|value| (value - target).abs() <= self.threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Converged,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitReport {
    pub outcome: WaitOutcome,
    /// Number of sleeps taken before the outcome.
    pub polls: u64,
    pub waited: Duration,
}

/// Blocks until `read_current` is within `criteria.threshold` of `target`.
///
/// `read_current` must take and release any lock itself; this function
/// sleeps between reads and must never be called with a lock held.
pub fn wait_until<F, C>(
    mut read_current: F,
    target: f64,
    criteria: &ConvergenceCriteria,
    token: &CancellationToken,
    clock: &C,
) -> WaitReport
where
    F: FnMut() -> Option<f64>,
    C: Clock + ?Sized,
{
    let started = clock.elapsed();
    let mut polls = 0u64;
    let mut current = read_current();

    loop {
        let waited = clock.elapsed().saturating_sub(started);
        if criteria.within(current, target) {
            return WaitReport {
                outcome: WaitOutcome::Converged,
                polls,
                waited,
            };
        }
        if token.is_stopped() {
            return WaitReport {
                outcome: WaitOutcome::Cancelled,
                polls,
                waited,
            };
        }
        if criteria.timeout.is_some_and(|limit| waited >= limit) {
            log::warn!(
                "no convergence to {target} after {:.1}s (last reading {current:?})",
                waited.as_secs_f64()
            );
            return WaitReport {
                outcome: WaitOutcome::TimedOut,
                polls,
                waited,
            };
        }

        clock.sleep(criteria.poll_interval);
        polls += 1;
        current = read_current();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::cell::Cell;
    use std::sync::Arc;

    fn criteria() -> ConvergenceCriteria {
        ConvergenceCriteria {
            threshold: 0.01,
            poll_interval: Duration::from_millis(100),
            timeout: None,
        }
    }

    #[test]
    fn converged_on_first_read_never_sleeps() {
        let clock = ManualClock::new();
        let token = CancellationToken::new();
        let report = wait_until(|| Some(4.305), 4.3, &criteria(), &token, &clock);
        assert_eq!(report.outcome, WaitOutcome::Converged);
        assert_eq!(report.polls, 0);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn polls_until_within_threshold() {
        let clock = ManualClock::new();
        let token = CancellationToken::new();
        let readings = [10.0, 7.0, 5.0, 4.301];
        let next = Cell::new(0usize);
        let report = wait_until(
            || {
                let i = next.get();
                next.set(i + 1);
                readings.get(i).copied()
            },
            4.3,
            &criteria(),
            &token,
            &clock,
        );
        assert_eq!(report.outcome, WaitOutcome::Converged);
        assert_eq!(report.polls, 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(100); 3]);
    }

    #[test]
    fn missing_and_nan_readings_keep_waiting() {
        let clock = ManualClock::new();
        let token = CancellationToken::new();
        let readings = [None, Some(f64::NAN), Some(1.0)];
        let next = Cell::new(0usize);
        let report = wait_until(
            || {
                let i = next.get();
                next.set(i + 1);
                readings[i]
            },
            1.0,
            &criteria(),
            &token,
            &clock,
        );
        assert_eq!(report.outcome, WaitOutcome::Converged);
        assert_eq!(report.polls, 2);
    }

    #[test]
    fn cancelled_within_one_poll() {
        let token = CancellationToken::new();
        let stopper = token.clone();
        let clock = ManualClock::with_sleep_hook(move |n| {
            if n == 3 {
                stopper.request_stop();
            }
        });
        let reads = Cell::new(0u32);
        let report = wait_until(
            || {
                reads.set(reads.get() + 1);
                Some(300.0)
            },
            4.3,
            &criteria(),
            &token,
            &clock,
        );
        assert_eq!(report.outcome, WaitOutcome::Cancelled);
        // Stop was requested during the third sleep; exactly one more read
        // happens before the token is checked.
        assert_eq!(report.polls, 3);
        assert_eq!(reads.get(), 4);
    }

    #[test]
    fn already_cancelled_reads_once_and_returns() {
        let token = CancellationToken::new();
        token.request_stop();
        let clock = ManualClock::new();
        let report = wait_until(|| Some(300.0), 4.3, &criteria(), &token, &clock);
        assert_eq!(report.outcome, WaitOutcome::Cancelled);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn times_out_after_limit() {
        let clock = ManualClock::new();
        let token = CancellationToken::new();
        let mut limited = criteria();
        limited.timeout = Some(Duration::from_secs(1));
        let report = wait_until(|| Some(300.0), 4.3, &limited, &token, &clock);
        assert_eq!(report.outcome, WaitOutcome::TimedOut);
        assert_eq!(report.polls, 10);
        assert_eq!(report.waited, Duration::from_secs(1));
    }

    #[test]
    fn real_clock_stop_from_other_thread() {
        use crate::clock::SystemClock;
        use std::time::Instant;

        let token = CancellationToken::new();
        let remote = token.clone();
        let clock = Arc::new(SystemClock::new());
        let fast = ConvergenceCriteria {
            threshold: 0.01,
            poll_interval: Duration::from_millis(10),
            timeout: None,
        };
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let at = Instant::now();
            remote.request_stop();
            at
        });
        let report = wait_until(|| Some(300.0), 4.3, &fast, &token, &clock);
        let returned = Instant::now();
        let stopped_at = stopper.join().unwrap();
        assert_eq!(report.outcome, WaitOutcome::Cancelled);
        assert!(returned.duration_since(stopped_at) < Duration::from_millis(200));
    }

    #[test]
    fn negative_threshold_rejected() {
        let mut bad = criteria();
        bad.threshold = -0.1;
        assert!(bad.validate().is_err());
    }
}
