use parking_lot::{Condvar, Mutex};

use std::time::Duration;

/// Parks a single worker thread until work arrives.
///
/// Producers call [`unpark`](Self::unpark) after publishing work; the worker
/// calls [`park_timeout`](Self::park_timeout) once it found nothing to do.
/// A notification that arrives while the worker is not parked is remembered,
/// so the next park returns immediately instead of missing the wake-up.
pub(crate) struct Parker {
    /// Set by `unpark`, consumed by `park_timeout`.
    notified: Mutex<bool>,

    /// Condition variable used to wake the parked worker.
    condvar: Condvar,
}

impl Parker {
    /// Creates a parker with no pending notification.
    pub(crate) fn new() -> Self {
        Self {
            notified: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until notified or until `timeout` elapses.
    pub(crate) fn park_timeout(&self, timeout: Duration) {
        let mut notified = self.notified.lock();

        if !*notified {
            self.condvar.wait_for(&mut notified, timeout);
        }

        *notified = false;
    }

    /// Wakes the parked worker, or primes the next park.
    pub(crate) fn unpark(&self) {
        *self.notified.lock() = true;
        self.condvar.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn early_unpark_is_not_lost() {
        let parker = Parker::new();
        parker.unpark();

        let start = Instant::now();
        parker.park_timeout(Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn unpark_wakes_parked_thread() {
        let parker = Arc::new(Parker::new());
        let worker = parker.clone();

        let handle = thread::spawn(move || {
            let start = Instant::now();
            worker.park_timeout(Duration::from_secs(10));
            start.elapsed()
        });

        thread::sleep(Duration::from_millis(20));
        parker.unpark();

        assert!(handle.join().unwrap() < Duration::from_secs(5));
    }
}
