use super::HashedWheelTimer;
use crate::error::Error;
use crate::executor::{Executor, ImmediateExecutor};
use crate::thread::{DefaultThreadFactory, ThreadFactory};
use crate::ticker::{Ticker, system_ticker};

use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TICK_DURATION: Duration = Duration::from_millis(100);
const MIN_TICK_DURATION: Duration = Duration::from_millis(1);
const DEFAULT_TICKS_PER_WHEEL: usize = 512;
const MAX_TICKS_PER_WHEEL: usize = 1 << 30;

/// Configures a [`HashedWheelTimer`].
///
/// | Setting | Default |
/// |---------|---------|
/// | `tick_duration` | 100 ms, at least 1 ms |
/// | `ticks_per_wheel` | 512, rounded up to a power of two |
/// | `max_pending_timeouts` | 0 (unbounded) |
/// | `thread_factory` | threads named `eventide-timer-{n}` |
/// | `ticker` | the system ticker |
/// | `task_executor` | [`ImmediateExecutor`], tasks run on the worker |
pub struct HashedWheelTimerBuilder {
    tick_duration: Duration,
    ticks_per_wheel: usize,
    max_pending_timeouts: usize,
    thread_factory: Option<Arc<dyn ThreadFactory>>,
    ticker: Arc<dyn Ticker>,
    task_executor: Arc<dyn Executor>,
}

impl HashedWheelTimerBuilder {
    /// Creates a builder with the defaults listed above.
    pub fn new() -> Self {
        Self {
            tick_duration: DEFAULT_TICK_DURATION,
            ticks_per_wheel: DEFAULT_TICKS_PER_WHEEL,
            max_pending_timeouts: 0,
            thread_factory: None,
            ticker: system_ticker(),
            task_executor: Arc::new(ImmediateExecutor),
        }
    }

    /// Duration of one tick, the timer's resolution.
    pub fn tick_duration(mut self, tick_duration: Duration) -> Self {
        self.tick_duration = tick_duration;
        self
    }

    /// Number of buckets in the wheel.
    pub fn ticks_per_wheel(mut self, ticks_per_wheel: usize) -> Self {
        self.ticks_per_wheel = ticks_per_wheel;
        self
    }

    /// Bound on outstanding timeouts, `0` for unbounded.
    pub fn max_pending_timeouts(mut self, max: usize) -> Self {
        self.max_pending_timeouts = max;
        self
    }

    /// Uses `factory` to spawn the worker thread.
    pub fn thread_factory(mut self, factory: Arc<dyn ThreadFactory>) -> Self {
        self.thread_factory = Some(factory);
        self
    }

    /// Clock the wheel ticks against. A [`MockTicker`](crate::ticker::MockTicker)
    /// makes expiry deterministic in tests.
    pub fn ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = ticker;
        self
    }

    /// Executor running expired tasks instead of the worker thread.
    pub fn task_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.task_executor = executor;
        self
    }

    /// Builds the timer. Its worker starts with the first timeout.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `tick_duration` is zero or
    /// `ticks_per_wheel` is zero or above 2^30.
    pub fn build(self) -> Result<HashedWheelTimer, Error> {
        if self.tick_duration.is_zero() {
            return Err(Error::invalid_argument("tick_duration must be > 0"));
        }

        if self.ticks_per_wheel == 0 || self.ticks_per_wheel > MAX_TICKS_PER_WHEEL {
            return Err(Error::invalid_argument(format!(
                "ticks_per_wheel must be in 1..={MAX_TICKS_PER_WHEEL}, got {}",
                self.ticks_per_wheel
            )));
        }

        let ticks_per_wheel = self.ticks_per_wheel.next_power_of_two();

        let mut tick_duration = self.tick_duration;
        if tick_duration < MIN_TICK_DURATION {
            tracing::warn!(
                configured = ?tick_duration,
                using = ?MIN_TICK_DURATION,
                "configured tick duration is below the minimum, clamping"
            );
            tick_duration = MIN_TICK_DURATION;
        }

        let tick_nanos = u64::try_from(tick_duration.as_nanos()).unwrap_or(u64::MAX);

        // The last tick of the wheel must not overflow a u64 of nanoseconds.
        if tick_nanos >= u64::MAX / ticks_per_wheel as u64 {
            return Err(Error::invalid_argument(format!(
                "tick_duration {tick_duration:?} is too long for {ticks_per_wheel} ticks per wheel"
            )));
        }

        let thread_factory = self
            .thread_factory
            .unwrap_or_else(|| Arc::new(DefaultThreadFactory::new("eventide-timer")));

        Ok(HashedWheelTimer::from_parts(
            tick_nanos,
            ticks_per_wheel,
            self.max_pending_timeouts,
            self.ticker,
            thread_factory,
            self.task_executor,
        ))
    }
}

impl Default for HashedWheelTimerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_tick_duration() {
        let result = HashedWheelTimerBuilder::new()
            .tick_duration(Duration::ZERO)
            .build();

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn rejects_oversized_wheel() {
        let result = HashedWheelTimerBuilder::new()
            .ticks_per_wheel(MAX_TICKS_PER_WHEEL + 1)
            .build();

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn sub_millisecond_tick_is_clamped() {
        let timer = HashedWheelTimerBuilder::new()
            .tick_duration(Duration::from_micros(10))
            .ticks_per_wheel(3)
            .build()
            .unwrap();

        assert_eq!(timer.shared.tick_duration, 1_000_000);
    }
}
