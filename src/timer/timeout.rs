use super::TimerShared;

use parking_lot::Mutex;

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

const ST_INIT: u8 = 0;
const ST_CANCELLED: u8 = 1;
const ST_EXPIRED: u8 = 2;

/// Node handle of a timeout that is not linked into any bucket.
pub(crate) const NO_NODE: usize = usize::MAX;

/// Work run when a [`Timeout`] expires.
pub type TimerTask = Box<dyn FnOnce(&Timeout) + Send + 'static>;

pub(crate) struct TimeoutInner {
    /// Nanoseconds since the timer started.
    deadline: u64,

    state: AtomicU8,

    /// Taken exactly once, by the expiring worker.
    task: Mutex<Option<TimerTask>>,

    /// Arena handle of the bucket node. Only used by the worker thread.
    node: AtomicUsize,

    timer: Weak<TimerShared>,
}

/// A handle to a task scheduled on a
/// [`HashedWheelTimer`](super::HashedWheelTimer).
///
/// Cloning is cheap; clones compare equal and hash alike.
#[derive(Clone)]
pub struct Timeout {
    inner: Arc<TimeoutInner>,
}

impl Timeout {
    pub(crate) fn new(deadline: u64, task: TimerTask, timer: Weak<TimerShared>) -> Self {
        Self {
            inner: Arc::new(TimeoutInner {
                deadline,
                state: AtomicU8::new(ST_INIT),
                task: Mutex::new(Some(task)),
                node: AtomicUsize::new(NO_NODE),
                timer,
            }),
        }
    }

    /// Deadline in nanoseconds since the timer started.
    pub fn deadline(&self) -> u64 {
        self.inner.deadline
    }

    /// Whether the task ran or is running.
    pub fn is_expired(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == ST_EXPIRED
    }

    /// Whether the timeout was cancelled before it expired.
    pub fn is_cancelled(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == ST_CANCELLED
    }

    /// Cancels the timeout.
    ///
    /// Valid from any thread, and idempotent. Returns whether this call
    /// cancelled it; `false` means it already expired or was cancelled.
    /// A cancelled timeout never runs its task.
    pub fn cancel(&self) -> bool {
        if self
            .inner
            .state
            .compare_exchange(ST_INIT, ST_CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        // Drop the task now rather than when the worker unlinks the node.
        self.inner.task.lock().take();

        if let Some(timer) = self.inner.timer.upgrade() {
            timer.pending_timeouts.fetch_sub(1, Ordering::AcqRel);
            timer.cancelled_timeouts.push(self.clone());
        }

        true
    }

    /// Runs the task through the timer's task executor.
    pub(crate) fn expire(&self, timer: &TimerShared) {
        if self
            .inner
            .state
            .compare_exchange(ST_INIT, ST_EXPIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        timer.pending_timeouts.fetch_sub(1, Ordering::AcqRel);

        let Some(task) = self.inner.task.lock().take() else {
            return;
        };

        let timeout = self.clone();
        if let Err(e) = timer
            .task_executor
            .execute(Box::new(move || task(&timeout)))
        {
            tracing::warn!(
                error = %e,
                deadline = self.inner.deadline,
                "an exception was thrown while submitting a timer task for execution"
            );
        }
    }

    pub(crate) fn node(&self) -> usize {
        self.inner.node.load(Ordering::Relaxed)
    }

    pub(crate) fn set_node(&self, node: usize) {
        self.inner.node.store(node, Ordering::Relaxed);
    }
}

impl PartialEq for Timeout {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Timeout {}

impl Hash for Timeout {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.inner).hash(state);
    }
}

impl std::fmt::Debug for Timeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.inner.state.load(Ordering::Acquire) {
            ST_CANCELLED => "cancelled",
            ST_EXPIRED => "expired",
            _ => "pending",
        };

        f.debug_struct("Timeout")
            .field("deadline", &self.inner.deadline)
            .field("state", &state)
            .finish()
    }
}
