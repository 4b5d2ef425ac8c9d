//! Tasks run by an executor at a deadline, once or periodically.

use super::core::Shared;
use super::heap::{NOT_IN_QUEUE, PriorityEntry};
use crate::promise::{EventFuture, Promise};
use crate::task::catch_panic;

use parking_lot::Mutex;

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// The work carried by a scheduled task.
pub(crate) enum Work<T> {
    /// Runs once and completes the promise with its value.
    Once(Option<Box<dyn FnOnce() -> T + Send>>),

    /// Runs on every period until cancelled or until it panics.
    Periodic(Box<dyn FnMut() + Send>),
}

/// A scheduled task as seen by the executor's heap.
pub(crate) trait ScheduledEntry: PriorityEntry + Send + Sync {
    /// Runs the task on the worker thread, re-queueing it if periodic.
    fn run(self: Arc<Self>, shared: &Arc<Shared>);

    /// Cancels the task's future without touching the heap.
    fn cancel_without_remove(&self) -> bool;

    fn is_cancelled(&self) -> bool;
}

pub(crate) struct ScheduledTask<T> {
    /// Tie-breaker for equal deadlines.
    id: u64,

    /// Next run time in ticker nanoseconds.
    deadline: AtomicU64,

    /// `0` one-shot, `> 0` fixed rate, `< 0` fixed delay, in nanoseconds.
    period: i64,

    /// Position in the heap.
    queue_index: AtomicUsize,

    promise: Promise<T>,

    /// Only locked by the worker thread.
    work: Mutex<Work<T>>,
}

impl<T: Clone + Send + Sync + 'static> ScheduledTask<T> {
    pub(crate) fn new(
        id: u64,
        deadline: u64,
        period: i64,
        promise: Promise<T>,
        work: Work<T>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            deadline: AtomicU64::new(deadline),
            period,
            queue_index: AtomicUsize::new(NOT_IN_QUEUE),
            promise,
            work: Mutex::new(work),
        })
    }

    fn run_once(&self) {
        if !self.promise.set_uncancellable() {
            return;
        }

        let work = match &mut *self.work.lock() {
            Work::Once(work) => work.take(),
            Work::Periodic(_) => None,
        };

        let Some(work) = work else {
            return;
        };

        match catch_panic(work) {
            Ok(value) => {
                self.promise.try_success(value);
            }
            Err(panicked) => {
                self.promise.try_failure(panicked.into_cause());
            }
        }
    }
}

impl<T> PriorityEntry for ScheduledTask<T> {
    fn deadline(&self) -> u64 {
        self.deadline.load(Ordering::Acquire)
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn queue_index(&self) -> usize {
        self.queue_index.load(Ordering::Relaxed)
    }

    fn set_queue_index(&self, index: usize) {
        self.queue_index.store(index, Ordering::Relaxed);
    }
}

impl<T: Clone + Send + Sync + 'static> ScheduledEntry for ScheduledTask<T> {
    fn run(self: Arc<Self>, shared: &Arc<Shared>) {
        if self.period == 0 {
            self.run_once();
            return;
        }

        if self.promise.is_cancelled() {
            return;
        }

        let result = match &mut *self.work.lock() {
            Work::Periodic(work) => catch_panic(work),
            Work::Once(_) => Ok(()),
        };

        if let Err(panicked) = result {
            self.promise.try_failure(panicked.into_cause());
            return;
        }

        if shared.is_shutdown() {
            return;
        }

        let next = if self.period > 0 {
            self.deadline().saturating_add(self.period.unsigned_abs())
        } else {
            shared
                .ticker
                .nano_time()
                .saturating_add(self.period.unsigned_abs())
        };
        self.deadline.store(next, Ordering::Release);

        if !self.promise.is_cancelled() {
            shared.scheduled.lock().push(self);
        }
    }

    fn cancel_without_remove(&self) -> bool {
        self.promise.cancel(false)
    }

    fn is_cancelled(&self) -> bool {
        self.promise.is_cancelled()
    }
}

/// Handle to a task scheduled on a
/// [`SingleThreadEventExecutor`](super::SingleThreadEventExecutor).
///
/// Dereferences to the [`EventFuture`] completed by the task. Cancelling
/// through [`cancel`](Self::cancel) also takes the task out of the
/// executor's scheduled queue.
pub struct ScheduledFuture<T> {
    future: EventFuture<T>,
    task: Arc<ScheduledTask<T>>,
    shared: Arc<Shared>,
}

impl<T: Clone + Send + Sync + 'static> ScheduledFuture<T> {
    pub(crate) fn new(task: Arc<ScheduledTask<T>>, shared: Arc<Shared>) -> Self {
        Self {
            future: task.promise.future(),
            task,
            shared,
        }
    }

    /// Time left until the next run, zero once due.
    pub fn delay(&self) -> Duration {
        let now = self.shared.ticker.nano_time();
        Duration::from_nanos(self.task.deadline().saturating_sub(now))
    }

    /// Whether the task runs more than once.
    pub fn is_periodic(&self) -> bool {
        self.task.period != 0
    }

    /// Cancels the task and removes it from the scheduled queue.
    ///
    /// Returns whether this call cancelled it.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        let cancelled = self.future.cancel(may_interrupt);

        if cancelled {
            self.shared.remove_scheduled(self.task.clone());
        }

        cancelled
    }

    /// Returns the future completed by the task.
    pub fn future(&self) -> EventFuture<T> {
        self.future.clone()
    }
}

impl<T> Clone for ScheduledFuture<T> {
    fn clone(&self) -> Self {
        Self {
            future: self.future.clone(),
            task: self.task.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T> Deref for ScheduledFuture<T> {
    type Target = EventFuture<T>;

    fn deref(&self) -> &EventFuture<T> {
        &self.future
    }
}

impl<T> std::fmt::Debug for ScheduledFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledFuture")
            .field("id", &self.task.id)
            .field("deadline", &self.task.deadline())
            .field("period", &self.task.period)
            .field("future", &self.future)
            .finish()
    }
}
