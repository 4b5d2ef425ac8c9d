//! A coarse, high-volume timer backed by a hashed wheel.
//!
//! [`HashedWheelTimer`] trades precision for O(1) insertion and
//! cancellation: timeouts are hashed into one of N buckets by deadline and a
//! worker thread visits one bucket per tick. A timeout fires on the first
//! tick at or after its deadline, so it may be late by up to one tick
//! duration, never early. Typical uses are idle and keep-alive timeouts.

mod bucket;
mod builder;
mod timeout;
mod wheel;

pub use builder::HashedWheelTimerBuilder;
pub use timeout::{TimerTask, Timeout};

use self::wheel::Wheel;
use crate::error::Error;
use crate::executor::Executor;
use crate::thread::ThreadFactory;
use crate::ticker::Ticker;

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

pub(crate) const WORKER_STATE_INIT: u8 = 0;
pub(crate) const WORKER_STATE_STARTED: u8 = 1;
pub(crate) const WORKER_STATE_SHUTDOWN: u8 = 2;

/// Live timers beyond which creating another one is reported.
const INSTANCE_COUNT_LIMIT: usize = 64;

static INSTANCE_COUNTER: AtomicUsize = AtomicUsize::new(0);
static WARNED_TOO_MANY_INSTANCES: AtomicBool = AtomicBool::new(false);

/// State shared between the timer handle, its timeouts and the worker.
pub(crate) struct TimerShared {
    pub(crate) worker_state: AtomicU8,

    /// Ticker time at which the worker started, once it did.
    pub(crate) start_time: Mutex<Option<u64>>,
    pub(crate) start_time_initialized: Condvar,

    /// In nanoseconds.
    pub(crate) tick_duration: u64,

    pub(crate) pending_timeouts: AtomicUsize,

    /// `0` for unbounded.
    max_pending_timeouts: usize,

    /// New timeouts, moved into buckets by the worker at each tick.
    pub(crate) timeouts: SegQueue<Timeout>,

    /// Cancelled timeouts, unlinked by the worker at each tick.
    pub(crate) cancelled_timeouts: SegQueue<Timeout>,

    /// Filled by the worker when it exits.
    pub(crate) unprocessed_timeouts: Mutex<Vec<Timeout>>,

    pub(crate) worker_thread: Mutex<Option<Thread>>,
    worker: Mutex<Option<JoinHandle<()>>>,

    /// The wheel, until the worker takes it.
    wheel: Mutex<Option<Wheel>>,

    pub(crate) ticker: Arc<dyn Ticker>,
    thread_factory: Arc<dyn ThreadFactory>,
    pub(crate) task_executor: Arc<dyn Executor>,

    /// Whether this timer still counts towards `INSTANCE_COUNTER`.
    counted: AtomicBool,
}

impl TimerShared {
    /// Removes this timer from the live instance count, at most once.
    fn release_instance(&self) {
        if self.counted.swap(false, Ordering::AcqRel) {
            INSTANCE_COUNTER.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn is_worker_thread(&self) -> bool {
        self.worker_thread
            .lock()
            .as_ref()
            .is_some_and(|worker| worker.id() == thread::current().id())
    }
}

/// A timer firing one-shot [`Timeout`]s on a dedicated worker thread.
///
/// The worker starts with the first [`new_timeout`](Self::new_timeout) and
/// runs until [`stop`](Self::stop). A stopped timer cannot be restarted.
/// Dropping a running timer stops its worker without waiting for it.
///
/// # Examples
///
/// ```rust
/// use eventide::timer::HashedWheelTimer;
/// use std::sync::mpsc;
/// use std::time::Duration;
///
/// let timer = HashedWheelTimer::builder()
///     .tick_duration(Duration::from_millis(10))
///     .build()
///     .unwrap();
///
/// let (tx, rx) = mpsc::channel();
/// timer
///     .new_timeout(move |_| tx.send("fired").unwrap(), Duration::from_millis(20))
///     .unwrap();
///
/// assert_eq!(rx.recv().unwrap(), "fired");
/// assert!(timer.stop().unwrap().is_empty());
/// ```
pub struct HashedWheelTimer {
    shared: Arc<TimerShared>,
}

impl HashedWheelTimer {
    /// Creates a timer with a 100 ms tick and 512 buckets.
    ///
    /// # Errors
    ///
    /// Never fails with the default configuration; see
    /// [`HashedWheelTimerBuilder::build`].
    pub fn new() -> Result<Self, Error> {
        HashedWheelTimerBuilder::new().build()
    }

    /// Returns a builder for a custom tick, wheel size, bound or clock.
    pub fn builder() -> HashedWheelTimerBuilder {
        HashedWheelTimerBuilder::new()
    }

    pub(crate) fn from_parts(
        tick_duration: u64,
        ticks_per_wheel: usize,
        max_pending_timeouts: usize,
        ticker: Arc<dyn Ticker>,
        thread_factory: Arc<dyn ThreadFactory>,
        task_executor: Arc<dyn Executor>,
    ) -> Self {
        let timer = Self {
            shared: Arc::new(TimerShared {
                worker_state: AtomicU8::new(WORKER_STATE_INIT),
                start_time: Mutex::new(None),
                start_time_initialized: Condvar::new(),
                tick_duration,
                pending_timeouts: AtomicUsize::new(0),
                max_pending_timeouts,
                timeouts: SegQueue::new(),
                cancelled_timeouts: SegQueue::new(),
                unprocessed_timeouts: Mutex::new(Vec::new()),
                worker_thread: Mutex::new(None),
                worker: Mutex::new(None),
                wheel: Mutex::new(Some(Wheel::new(ticks_per_wheel))),
                ticker,
                thread_factory,
                task_executor,
                counted: AtomicBool::new(true),
            }),
        };

        let live = INSTANCE_COUNTER.fetch_add(1, Ordering::AcqRel) + 1;
        if live > INSTANCE_COUNT_LIMIT
            && WARNED_TOO_MANY_INSTANCES
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            tracing::error!(
                instances = live,
                "too many HashedWheelTimer instances; it is a shared resource that \
                 must be reused across the process"
            );
        }

        timer
    }

    /// Starts the worker if needed and waits until its start time is known.
    fn start(&self) -> Result<u64, Error> {
        match self.shared.worker_state.load(Ordering::Acquire) {
            WORKER_STATE_INIT => {
                if self
                    .shared
                    .worker_state
                    .compare_exchange(
                        WORKER_STATE_INIT,
                        WORKER_STATE_STARTED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.spawn_worker()?;
                }
            }
            WORKER_STATE_STARTED => {}
            _ => {
                return Err(Error::illegal_state("cannot be started once stopped"));
            }
        }

        let mut start_time = self.shared.start_time.lock();
        loop {
            if let Some(start) = *start_time {
                return Ok(start);
            }

            if self.shared.worker_state.load(Ordering::Acquire) == WORKER_STATE_SHUTDOWN {
                return Err(Error::illegal_state("cannot be started once stopped"));
            }

            self.shared
                .start_time_initialized
                .wait_for(&mut start_time, Duration::from_millis(10));
        }
    }

    fn spawn_worker(&self) -> Result<(), Error> {
        let Some(wheel) = self.shared.wheel.lock().take() else {
            return Err(Error::illegal_state("timer worker already started"));
        };

        let shared = self.shared.clone();
        match self
            .shared
            .thread_factory
            .new_thread(Box::new(move || wheel::run(shared, wheel)))
        {
            Ok(handle) => {
                *self.shared.worker.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared
                    .worker_state
                    .store(WORKER_STATE_SHUTDOWN, Ordering::Release);
                self.shared.release_instance();
                Err(Error::illegal_state(format!(
                    "failed to start the timer worker: {e}"
                )))
            }
        }
    }

    /// Schedules `task` to run once, after `delay`.
    ///
    /// The task receives its own [`Timeout`]. It runs on the timer's task
    /// executor, the worker thread itself by default.
    ///
    /// # Errors
    ///
    /// [`Error::Rejected`] if the number of pending timeouts would exceed
    /// the configured maximum, [`Error::IllegalState`] once stopped.
    pub fn new_timeout<F>(&self, task: F, delay: Duration) -> Result<Timeout, Error>
    where
        F: FnOnce(&Timeout) + Send + 'static,
    {
        let pending = self.shared.pending_timeouts.fetch_add(1, Ordering::AcqRel) + 1;
        let max = self.shared.max_pending_timeouts;

        if max > 0 && pending > max {
            self.shared.pending_timeouts.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::rejected(format!(
                "number of pending timeouts ({pending}) is greater than or equal to \
                 maximum allowed pending timeouts ({max})"
            )));
        }

        let start_time = match self.start() {
            Ok(start_time) => start_time,
            Err(e) => {
                self.shared.pending_timeouts.fetch_sub(1, Ordering::AcqRel);
                return Err(e);
            }
        };

        let delay = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        let deadline = self
            .shared
            .ticker
            .nano_time()
            .saturating_add(delay)
            .saturating_sub(start_time);

        let timeout = Timeout::new(deadline, Box::new(task), Arc::downgrade(&self.shared));
        self.shared.timeouts.push(timeout.clone());

        Ok(timeout)
    }

    /// Number of timeouts that neither expired nor were cancelled.
    pub fn pending_timeouts(&self) -> usize {
        self.shared.pending_timeouts.load(Ordering::Acquire)
    }

    /// Stops the worker and cancels every timeout that has not fired.
    ///
    /// Returns the timeouts cancelled this way. Stopping a timer that never
    /// started, or that is already stopped, returns an empty set.
    ///
    /// # Errors
    ///
    /// [`Error::IllegalState`] when called from the worker thread, that is
    /// from a timer task run on the worker.
    pub fn stop(&self) -> Result<HashSet<Timeout>, Error> {
        if self.shared.is_worker_thread() {
            return Err(Error::illegal_state(
                "HashedWheelTimer::stop() cannot be called from a timer task",
            ));
        }

        if self
            .shared
            .worker_state
            .compare_exchange(
                WORKER_STATE_STARTED,
                WORKER_STATE_SHUTDOWN,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            self.shared
                .worker_state
                .store(WORKER_STATE_SHUTDOWN, Ordering::Release);
            self.shared.release_instance();

            return Ok(HashSet::new());
        }

        if let Some(worker) = self.shared.worker_thread.lock().as_ref() {
            worker.unpark();
        }

        let handle = self.shared.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("the hashed wheel timer worker panicked");
            }
        }

        self.shared.release_instance();

        let unprocessed = std::mem::take(&mut *self.shared.unprocessed_timeouts.lock());
        let cancelled = unprocessed
            .into_iter()
            .filter(|timeout| timeout.cancel())
            .collect();

        Ok(cancelled)
    }
}

impl Drop for HashedWheelTimer {
    fn drop(&mut self) {
        self.shared.release_instance();

        if self
            .shared
            .worker_state
            .swap(WORKER_STATE_SHUTDOWN, Ordering::AcqRel)
            == WORKER_STATE_SHUTDOWN
        {
            return;
        }

        if let Some(worker) = self.shared.worker_thread.lock().as_ref() {
            worker.unpark();
        }
    }
}

impl std::fmt::Debug for HashedWheelTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashedWheelTimer")
            .field("tick_duration", &Duration::from_nanos(self.shared.tick_duration))
            .field("pending_timeouts", &self.pending_timeouts())
            .field("state", &self.shared.worker_state.load(Ordering::Acquire))
            .finish()
    }
}
