use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of sleeps and elapsed time for the sequence worker.
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration);

    /// Monotonic time since the clock was created.
    fn elapsed(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Monotonic microseconds since start.
    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Wall-clock microseconds since Unix epoch (for cross-process logs only).
    pub fn unix_us(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

type SleepHook = Box<dyn Fn(usize) + Send + Sync>;

/// Virtual clock: `sleep` advances time instantly and records the request.
pub struct ManualClock {
    state: Mutex<ManualState>,
    on_sleep: Option<SleepHook>,
}

#[derive(Debug, Default)]
struct ManualState {
    now: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManualState::default()),
            on_sleep: None,
        }
    }

    /// Runs `hook` after every sleep with the number of sleeps so far.
    pub fn with_sleep_hook(hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(ManualState::default()),
            on_sleep: Some(Box::new(hook)),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    pub fn advance(&self, duration: Duration) {
        self.lock().now += duration;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn sleep(&self, duration: Duration) {
        let count = {
            let mut state = self.lock();
            state.now += duration;
            state.sleeps.push(duration);
            state.sleeps.len()
        };
        if let Some(hook) = &self.on_sleep {
            hook(count);
        }
    }

    fn elapsed(&self) -> Duration {
        self.lock().now
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }

    fn elapsed(&self) -> Duration {
        (**self).elapsed()
    }
}
