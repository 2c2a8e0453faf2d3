use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop flag shared between a controller and a running worker.
///
/// Clones share the same flag. Once stopped the token stays stopped; a new
/// run gets a new token.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    stopped: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Safe to call from any thread, any number of times.
    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn starts_running() {
        assert!(!CancellationToken::new().is_stopped());
    }

    #[test]
    fn stop_is_idempotent_and_shared() {
        let token = CancellationToken::new();
        let remote = token.clone();
        remote.request_stop();
        remote.request_stop();
        assert!(token.is_stopped());
    }

    #[test]
    fn stop_from_another_thread() {
        let token = CancellationToken::new();
        let remote = token.clone();
        thread::spawn(move || remote.request_stop()).join().unwrap();
        assert!(token.is_stopped());
    }
}
