use super::builder::EventExecutorBuilder;
use super::context::{is_worker_of, next_executor_id};
use super::heap::PriorityQueue;
use super::scheduled::{ScheduledEntry, ScheduledFuture, ScheduledTask, Work};
use super::state::{
    NOT_STARTED, SHUTDOWN, SHUTTING_DOWN, STARTED, SUSPENDED, SUSPENDING, TERMINATED,
};
use super::worker;
use super::{EventExecutor, Executor};
use crate::error::Error;
use crate::promise::{EventFuture, Promise};
use crate::task::{Task, catch_panic};
use crate::thread::ThreadFactory;
use crate::ticker::Ticker;
use crate::utils::Parker;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

use std::cell::UnsafeCell;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, Thread, ThreadId};
use std::time::Duration;

/// Default quiet period of [`SingleThreadEventExecutor::shutdown_gracefully_default`].
pub const DEFAULT_SHUTDOWN_QUIET_PERIOD: Duration = Duration::from_secs(2);

/// Default timeout of [`SingleThreadEventExecutor::shutdown_gracefully_default`].
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// A queued task that can be claimed by exactly one party.
///
/// Normally the worker claims it and runs it. A submitter whose submission
/// failed after enqueueing (worker spawn error, shutdown race) claims it
/// back instead, so the task is rejected rather than run later.
pub(crate) struct TaskSlot {
    claimed: AtomicBool,
    task: UnsafeCell<Option<Task>>,
}

// SAFETY: `task` is only accessed by the party that flips `claimed`.
unsafe impl Sync for TaskSlot {}

impl TaskSlot {
    fn new(task: Task) -> Arc<Self> {
        Arc::new(Self {
            claimed: AtomicBool::new(false),
            task: UnsafeCell::new(Some(task)),
        })
    }

    fn claim(&self) -> Option<Task> {
        if self.claimed.swap(true, Ordering::AcqRel) {
            return None;
        }

        // SAFETY: the swap above succeeds for exactly one caller.
        unsafe { (*self.task.get()).take() }
    }
}

/// State shared between executor handles and the worker thread.
pub(crate) struct Shared {
    /// Process-unique identifier, matched against the worker's thread-local.
    id: usize,

    /// Lifecycle state. See [`super::state`].
    pub(crate) state: AtomicU8,

    /// Multi-producer queue; the worker is its only consumer.
    task_queue: SegQueue<Arc<TaskSlot>>,

    /// Number of unclaimed tasks in `task_queue`.
    pending: AtomicUsize,

    /// Bound on `pending` for external submissions.
    max_pending_tasks: Option<usize>,

    /// Parks the idle worker.
    pub(crate) parker: Parker,

    /// Scheduled tasks ordered by deadline. Only locked by the worker.
    pub(crate) scheduled: Mutex<PriorityQueue<dyn ScheduledEntry>>,

    /// Source of scheduled task identifiers.
    next_task_id: AtomicU64,

    /// Clock for deadlines, quiet periods and idle tracking.
    pub(crate) ticker: Arc<dyn Ticker>,

    /// Spawns the worker thread.
    thread_factory: Arc<dyn ThreadFactory>,

    /// Identity of the current worker thread.
    worker_thread: Mutex<Option<ThreadId>>,

    /// Completed once the worker terminated.
    pub(crate) termination: Promise<()>,

    /// Run by the worker while shutting down.
    shutdown_hooks: Mutex<Vec<Task>>,

    /// Graceful shutdown parameters, in ticker nanoseconds.
    pub(crate) quiet_period: AtomicU64,
    pub(crate) shutdown_timeout: AtomicU64,

    /// Worker-only bookkeeping, in ticker nanoseconds.
    pub(crate) graceful_shutdown_start: AtomicU64,
    pub(crate) last_execution_time: AtomicU64,

    /// Idle time after which the worker exits, in ticker nanoseconds.
    pub(crate) suspend_after_idle: Option<u64>,
}

/// Marks a worker timestamp that was never recorded.
pub(crate) const UNSET: u64 = u64::MAX;

pub(crate) fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl Shared {
    pub(crate) fn new(
        thread_factory: Arc<dyn ThreadFactory>,
        ticker: Arc<dyn Ticker>,
        max_pending_tasks: Option<usize>,
        suspend_after_idle: Option<Duration>,
    ) -> Self {
        Self {
            id: next_executor_id(),
            state: AtomicU8::new(NOT_STARTED),
            task_queue: SegQueue::new(),
            pending: AtomicUsize::new(0),
            max_pending_tasks,
            parker: Parker::new(),
            scheduled: Mutex::new(PriorityQueue::new()),
            next_task_id: AtomicU64::new(1),
            ticker,
            thread_factory,
            worker_thread: Mutex::new(None),
            termination: Promise::new(),
            shutdown_hooks: Mutex::new(Vec::new()),
            quiet_period: AtomicU64::new(0),
            shutdown_timeout: AtomicU64::new(0),
            graceful_shutdown_start: AtomicU64::new(UNSET),
            last_execution_time: AtomicU64::new(0),
            suspend_after_idle: suspend_after_idle.map(nanos),
        }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn in_event_loop(&self) -> bool {
        is_worker_of(self.id)
    }

    pub(crate) fn load_state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.load_state() >= SHUTTING_DOWN
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.load_state() >= SHUTDOWN
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.load_state() == TERMINATED
    }

    pub(crate) fn set_worker_thread(&self, thread: Option<ThreadId>) {
        *self.worker_thread.lock() = thread;
    }

    pub(crate) fn worker_thread(&self) -> Option<ThreadId> {
        *self.worker_thread.lock()
    }

    pub(crate) fn has_tasks(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn pending_tasks(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Submits `task`, starting the worker if needed.
    ///
    /// A rejected task never runs: if the submission fails after the task
    /// was queued, it is claimed back before the error is returned.
    pub(crate) fn submit_task(self: &Arc<Self>, task: Task) -> Result<(), Error> {
        let in_event_loop = self.in_event_loop();
        let slot = self.add_task(task)?;

        if !in_event_loop {
            if let Err(e) = self.start_thread() {
                // A worker started by someone else may already own the task.
                if self.claim_back(&slot) {
                    return Err(e);
                }
                return Ok(());
            }

            if self.is_shutdown() && self.claim_back(&slot) {
                return Err(Error::rejected("event executor terminated"));
            }

            self.parker.unpark();
        }

        Ok(())
    }

    fn add_task(&self, task: Task) -> Result<Arc<TaskSlot>, Error> {
        if self.is_shutdown() {
            return Err(Error::rejected("event executor terminated"));
        }

        // Pairs with the state CAS in the worker's suspend check.
        let queued = self.pending.fetch_add(1, Ordering::SeqCst);
        if let Some(max) = self.max_pending_tasks {
            if queued >= max {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                return Err(Error::rejected(format!(
                    "task queue is full ({max} pending tasks)"
                )));
            }
        }

        let slot = TaskSlot::new(task);
        self.task_queue.push(slot.clone());
        Ok(slot)
    }

    /// Takes a queued task back from the worker. The slot stays in the
    /// queue and is skipped when popped.
    fn claim_back(&self, slot: &TaskSlot) -> bool {
        if slot.claim().is_none() {
            return false;
        }

        self.pending.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// Enqueues work produced by the worker itself, bypassing bound and
    /// shutdown checks.
    pub(crate) fn push_internal(&self, task: Task) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.task_queue.push(TaskSlot::new(task));
    }

    /// Pops the next task that was not claimed back by its submitter.
    pub(crate) fn poll_task(&self) -> Option<Task> {
        while let Some(slot) = self.task_queue.pop() {
            if let Some(task) = slot.claim() {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                return Some(task);
            }
        }

        None
    }

    /// Starts the worker if it is not running. Exactly one caller wins the
    /// state CAS and spawns the thread; the others return immediately.
    fn start_thread(self: &Arc<Self>) -> Result<(), Error> {
        loop {
            // SeqCst: the worker's suspend check must not miss a task queued
            // before this load.
            let current = self.state.load(Ordering::SeqCst);

            match current {
                NOT_STARTED | SUSPENDED => {
                    if self
                        .state
                        .compare_exchange(current, STARTED, Ordering::SeqCst, Ordering::SeqCst)
                        .is_err()
                    {
                        continue;
                    }

                    if let Err(e) = self.spawn_worker() {
                        let _ = self.state.compare_exchange(
                            STARTED,
                            current,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        );
                        return Err(Error::rejected(format!(
                            "failed to start the worker thread: {e}"
                        )));
                    }

                    return Ok(());
                }
                // The worker is deciding whether to exit; wait for the verdict.
                SUSPENDING => thread::yield_now(),
                _ => return Ok(()),
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>) -> io::Result<()> {
        let shared = self.clone();

        self.thread_factory
            .new_thread(Box::new(move || worker::run(shared)))
            .map(drop)
    }

    pub(crate) fn next_task_id(&self) -> u64 {
        self.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Adds `entry` to the scheduled heap, from the worker or through it.
    pub(crate) fn schedule_entry(self: &Arc<Self>, entry: Arc<dyn ScheduledEntry>) -> Result<(), Error> {
        if self.in_event_loop() {
            self.scheduled.lock().push(entry);
            return Ok(());
        }

        let shared = self.clone();
        self.submit_task(Box::new(move || {
            if !entry.is_cancelled() {
                shared.scheduled.lock().push(entry);
            }
        }))
    }

    /// Removes a cancelled entry from the heap, from the worker or through it.
    pub(crate) fn remove_scheduled(self: &Arc<Self>, entry: Arc<dyn ScheduledEntry>) {
        if self.in_event_loop() {
            self.scheduled.lock().remove(&*entry);
            return;
        }

        let shared = self.clone();
        // A rejected removal is harmless: cancelled entries are skipped when
        // they come due, and shutdown clears the heap.
        let _ = self.submit_task(Box::new(move || {
            shared.scheduled.lock().remove(&*entry);
        }));
    }

    /// Nanoseconds until the earliest scheduled deadline, if any.
    pub(crate) fn next_scheduled_delay(&self) -> Option<u64> {
        let deadline = self.scheduled.lock().peek()?.deadline();
        Some(deadline.saturating_sub(self.ticker.nano_time()))
    }

    /// Moves every due scheduled task into the run queue.
    pub(crate) fn fetch_from_scheduled_task_queue(self: &Arc<Self>) {
        let now = self.ticker.nano_time();

        loop {
            let due = self.scheduled.lock().poll_due(now);
            let Some(entry) = due else {
                return;
            };

            let shared = self.clone();
            self.push_internal(Box::new(move || entry.run(&shared)));
        }
    }

    /// Cancels every task still waiting in the scheduled heap.
    pub(crate) fn cancel_scheduled_tasks(&self) {
        let entries = self.scheduled.lock().drain();

        for entry in entries {
            entry.cancel_without_remove();
        }
    }

    pub(crate) fn add_shutdown_hook(&self, hook: Task) {
        self.shutdown_hooks.lock().push(hook);
    }

    pub(crate) fn take_shutdown_hooks(&self) -> Vec<Task> {
        std::mem::take(&mut *self.shutdown_hooks.lock())
    }

    pub(crate) fn shutdown_gracefully(
        self: &Arc<Self>,
        quiet_period: Duration,
        timeout: Duration,
    ) -> Result<EventFuture<()>, Error> {
        if timeout < quiet_period {
            return Err(Error::invalid_argument(format!(
                "timeout ({timeout:?}) must be >= quiet period ({quiet_period:?})"
            )));
        }

        let old_state = loop {
            if self.is_shutting_down() {
                return Ok(self.termination.future());
            }

            let old_state = self.load_state();
            if self
                .state
                .compare_exchange(old_state, SHUTTING_DOWN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break old_state;
            }
        };

        self.quiet_period.store(nanos(quiet_period), Ordering::Release);
        self.shutdown_timeout.store(nanos(timeout), Ordering::Release);

        if old_state == NOT_STARTED || old_state == SUSPENDED {
            if let Err(e) = self.spawn_worker() {
                self.state.store(TERMINATED, Ordering::Release);
                self.termination.try_failure(Arc::new(e));
                return Ok(self.termination.future());
            }
        }

        tracing::debug!(executor = self.id, ?quiet_period, ?timeout, "shutdown requested");
        self.parker.unpark();

        Ok(self.termination.future())
    }
}

fn signed_nanos(duration: Duration) -> i64 {
    i64::try_from(nanos(duration)).unwrap_or(i64::MAX)
}

/// An executor backed by one worker thread.
///
/// Every task submitted to the executor runs on that thread, one at a time,
/// in submission order. The thread is started lazily by the first
/// submission and is obtained from the configured [`ThreadFactory`].
///
/// Handles are cheap to clone and all refer to the same executor. The
/// worker keeps running until [`shutdown_gracefully`](Self::shutdown_gracefully)
/// is called, or until it idled for the configured suspension delay.
///
/// # Examples
///
/// ```rust
/// use eventide::executor::SingleThreadEventExecutor;
/// use std::time::Duration;
///
/// let executor = SingleThreadEventExecutor::new();
/// let answer = executor.submit(|| 6 * 7).unwrap();
/// assert_eq!(answer.get().unwrap(), 42);
///
/// executor
///     .shutdown_gracefully(Duration::ZERO, Duration::ZERO)
///     .unwrap()
///     .sync()
///     .unwrap();
/// assert!(executor.is_terminated());
/// ```
#[derive(Clone)]
pub struct SingleThreadEventExecutor {
    shared: Arc<Shared>,
}

impl SingleThreadEventExecutor {
    /// Creates an executor with the default configuration.
    pub fn new() -> Self {
        EventExecutorBuilder::new().build()
    }

    /// Returns a builder to configure a new executor.
    pub fn builder() -> EventExecutorBuilder {
        EventExecutorBuilder::new()
    }

    pub(crate) fn from_shared(shared: Shared) -> Self {
        Self {
            shared: Arc::new(shared),
        }
    }

    fn as_event_executor(&self) -> Arc<dyn EventExecutor> {
        Arc::new(self.clone())
    }

    /// Creates a promise owned by this executor.
    ///
    /// Its listeners are notified on the worker thread.
    pub fn new_promise<T: Clone + Send + Sync + 'static>(&self) -> Promise<T> {
        Promise::with_executor(self.as_event_executor())
    }

    /// Submits `f` and returns a future completed with its result.
    ///
    /// A panic inside `f` fails the future with a
    /// [`TaskPanicked`](crate::error::TaskPanicked) cause. Cancelling the
    /// future before `f` started prevents it from running.
    ///
    /// # Errors
    ///
    /// [`Error::Rejected`] if the executor is shut down or its queue is full.
    pub fn submit<T, F>(&self, f: F) -> Result<EventFuture<T>, Error>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let promise = self.new_promise();
        let future = promise.future();

        self.shared.submit_task(Box::new(move || {
            if !promise.set_uncancellable() {
                return;
            }

            match catch_panic(f) {
                Ok(value) => {
                    promise.try_success(value);
                }
                Err(panicked) => {
                    promise.try_failure(panicked.into_cause());
                }
            }
        }))?;

        Ok(future)
    }

    /// Runs `f` once, after `delay`.
    ///
    /// # Errors
    ///
    /// [`Error::Rejected`] if the executor is shut down.
    pub fn schedule<T, F>(&self, f: F, delay: Duration) -> Result<ScheduledFuture<T>, Error>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let work: Box<dyn FnOnce() -> T + Send> = Box::new(f);
        self.schedule_work(Work::Once(Some(work)), delay, 0)
    }

    /// Runs `f` after `initial_delay`, then every `period`.
    ///
    /// Deadlines are computed from the previous deadline, so a late run is
    /// followed by catch-up runs. The returned future only completes by
    /// cancellation, or by failure if `f` panics.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `period` is zero, [`Error::Rejected`] if
    /// the executor is shut down.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        f: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledFuture<()>, Error>
    where
        F: FnMut() + Send + 'static,
    {
        if period.is_zero() {
            return Err(Error::invalid_argument("period: 0 (expected: > 0)"));
        }

        self.schedule_work(
            Work::Periodic(Box::new(f)),
            initial_delay,
            signed_nanos(period),
        )
    }

    /// Runs `f` after `initial_delay`, then again `delay` after each run
    /// completed.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `delay` is zero, [`Error::Rejected`] if
    /// the executor is shut down.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        f: F,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<ScheduledFuture<()>, Error>
    where
        F: FnMut() + Send + 'static,
    {
        if delay.is_zero() {
            return Err(Error::invalid_argument("delay: 0 (expected: > 0)"));
        }

        self.schedule_work(
            Work::Periodic(Box::new(f)),
            initial_delay,
            -signed_nanos(delay),
        )
    }

    fn schedule_work<T>(
        &self,
        work: Work<T>,
        delay: Duration,
        period: i64,
    ) -> Result<ScheduledFuture<T>, Error>
    where
        T: Clone + Send + Sync + 'static,
    {
        if self.shared.is_shutdown() {
            return Err(Error::rejected("event executor terminated"));
        }

        let deadline = self.shared.ticker.nano_time().saturating_add(nanos(delay));
        let task = ScheduledTask::new(
            self.shared.next_task_id(),
            deadline,
            period,
            self.new_promise(),
            work,
        );

        self.shared.schedule_entry(task.clone())?;
        Ok(ScheduledFuture::new(task, self.shared.clone()))
    }

    /// Registers `hook` to run on the worker thread while shutting down.
    pub fn add_shutdown_hook<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.add_shutdown_hook(Box::new(hook));
    }

    /// Whether `thread` is the current worker thread of this executor.
    pub fn is_event_loop_thread(&self, thread: &Thread) -> bool {
        self.shared.worker_thread() == Some(thread.id())
    }

    /// Whether a shutdown was requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shared.is_shutting_down()
    }

    /// Whether submissions are rejected.
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Whether the worker exited for good.
    pub fn is_terminated(&self) -> bool {
        self.shared.is_terminated()
    }

    /// Number of tasks waiting in the run queue.
    pub fn pending_tasks(&self) -> usize {
        self.shared.pending_tasks()
    }

    /// Requests a graceful shutdown.
    ///
    /// The worker keeps accepting and running tasks until no task was
    /// submitted for `quiet_period`, or until `timeout` elapsed since the
    /// request, whichever comes first. Pending tasks and shutdown hooks are
    /// then run and the executor terminates. Calling it again is a no-op
    /// returning the same termination future.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `timeout < quiet_period`.
    pub fn shutdown_gracefully(
        &self,
        quiet_period: Duration,
        timeout: Duration,
    ) -> Result<EventFuture<()>, Error> {
        self.shared.shutdown_gracefully(quiet_period, timeout)
    }

    /// [`shutdown_gracefully`](Self::shutdown_gracefully) with a 2 s quiet
    /// period and a 15 s timeout.
    pub fn shutdown_gracefully_default(&self) -> EventFuture<()> {
        self.shared
            .shutdown_gracefully(DEFAULT_SHUTDOWN_QUIET_PERIOD, DEFAULT_SHUTDOWN_TIMEOUT)
            .unwrap_or_else(|_| self.termination_future())
    }

    /// Future completed once the executor terminated.
    pub fn termination_future(&self) -> EventFuture<()> {
        self.shared.termination.future()
    }

    /// Blocks until the executor terminated or `timeout` elapsed.
    ///
    /// Returns whether the executor terminated.
    ///
    /// # Errors
    ///
    /// [`Error::IllegalState`] when called from the worker thread.
    pub fn await_termination(&self, timeout: Duration) -> Result<bool, Error> {
        if self.in_event_loop() {
            return Err(Error::illegal_state(
                "cannot await termination of the current thread",
            ));
        }

        self.shared.termination.wait_timeout(timeout)
    }
}

impl Default for SingleThreadEventExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for SingleThreadEventExecutor {
    fn execute(&self, task: Task) -> Result<(), Error> {
        self.shared.submit_task(task)
    }
}

impl EventExecutor for SingleThreadEventExecutor {
    fn in_event_loop(&self) -> bool {
        self.shared.in_event_loop()
    }
}

impl std::fmt::Debug for SingleThreadEventExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleThreadEventExecutor")
            .field("id", &self.shared.id())
            .field("state", &self.shared.load_state())
            .field("pending_tasks", &self.shared.pending_tasks())
            .finish()
    }
}
