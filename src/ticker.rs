//! Monotonic time sources.
//!
//! Executors and timers never call [`Instant::now`] directly; they read time
//! through a [`Ticker`]. Production code uses [`SystemTicker`], tests
//! substitute a [`MockTicker`] and move time forward by hand.

use parking_lot::{Condvar, Mutex};

use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

/// A monotonic nanosecond clock that can also put the caller to sleep.
pub trait Ticker: Send + Sync + 'static {
    /// Nanoseconds elapsed since an arbitrary, fixed origin.
    fn nano_time(&self) -> u64;

    /// Blocks the calling thread for roughly `duration` of ticker time.
    ///
    /// May return early. Callers re-read [`nano_time`](Self::nano_time) and
    /// sleep again if the target has not been reached.
    fn sleep(&self, duration: Duration);
}

/// Ticker backed by [`Instant`].
///
/// Sleeping uses [`thread::park_timeout`], so unparking the sleeping thread
/// cuts the sleep short.
#[derive(Debug, Clone, Copy)]
pub struct SystemTicker {
    origin: Instant,
}

impl SystemTicker {
    /// Creates a ticker whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker for SystemTicker {
    fn nano_time(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn sleep(&self, duration: Duration) {
        thread::park_timeout(duration);
    }
}

/// Returns the process-wide system ticker.
pub fn system_ticker() -> Arc<dyn Ticker> {
    static SYSTEM: OnceLock<Arc<SystemTicker>> = OnceLock::new();

    SYSTEM.get_or_init(|| Arc::new(SystemTicker::new())).clone()
}

/// Longest real-time wait performed by [`MockTicker::sleep`].
const MOCK_SLEEP_SLICE: Duration = Duration::from_millis(10);

/// A ticker that only moves when told to.
///
/// [`advance`](Self::advance) wakes every thread currently sleeping on the
/// ticker. Sleepers also return after a short real-time slice so that a
/// shutdown signal is noticed even when time is frozen.
#[derive(Debug, Default)]
pub struct MockTicker {
    nanos: Mutex<u64>,
    advanced: Condvar,
}

impl MockTicker {
    /// Creates a ticker frozen at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves time forward by `amount` and wakes sleepers.
    pub fn advance(&self, amount: Duration) {
        let nanos = u64::try_from(amount.as_nanos()).unwrap_or(u64::MAX);

        let mut now = self.nanos.lock();
        *now = now.saturating_add(nanos);
        drop(now);

        self.advanced.notify_all();
    }

    /// Moves time forward by `millis` milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }
}

impl Ticker for MockTicker {
    fn nano_time(&self) -> u64 {
        *self.nanos.lock()
    }

    fn sleep(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);

        let mut now = self.nanos.lock();
        let target = now.saturating_add(nanos);

        if *now < target {
            self.advanced.wait_for(&mut now, MOCK_SLEEP_SLICE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_ticker_only_moves_when_advanced() {
        let ticker = MockTicker::new();
        assert_eq!(ticker.nano_time(), 0);

        ticker.advance_millis(5);
        assert_eq!(ticker.nano_time(), 5_000_000);

        ticker.advance(Duration::from_nanos(7));
        assert_eq!(ticker.nano_time(), 5_000_007);
    }

    #[test]
    fn mock_ticker_wakes_sleepers() {
        let ticker = Arc::new(MockTicker::new());
        let sleeper = ticker.clone();

        let handle = thread::spawn(move || {
            while sleeper.nano_time() < 1_000_000_000 {
                sleeper.sleep(Duration::from_secs(1));
            }
        });

        ticker.advance(Duration::from_secs(1));
        handle.join().unwrap();
    }

    #[test]
    fn system_ticker_is_monotonic() {
        let ticker = SystemTicker::new();
        let a = ticker.nano_time();
        let b = ticker.nano_time();
        assert!(b >= a);
    }
}
