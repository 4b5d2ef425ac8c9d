use super::context::{enter_listener_frame, run_or_defer};
use super::future::EventFuture;
use super::listener::{ListenerKey, Listeners};
use super::state::{
    CANCELLED, COMPLETING, FAILURE, PENDING, SUCCESS, UNCANCELLABLE, is_terminal,
};
use crate::error::{Cause, Error};
use crate::executor::EventExecutor;

use parking_lot::{Condvar, Mutex};

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::Waker;

/// The published result of a completed promise.
pub(crate) enum Outcome<T> {
    Success(T),
    Failure(Cause),
    Cancelled,
}

impl<T> Outcome<T> {
    fn state(&self) -> u8 {
        match self {
            Self::Success(_) => SUCCESS,
            Self::Failure(_) => FAILURE,
            Self::Cancelled => CANCELLED,
        }
    }
}

/// State guarded by the promise monitor.
pub(crate) struct Monitor<T> {
    /// Registered listeners, in add order.
    pub(crate) listeners: Listeners<T>,

    /// Set while some thread is running a notification pass.
    notifying: bool,

    /// Wakers of async tasks awaiting this promise.
    pub(crate) wakers: Vec<Waker>,

    /// Source of listener keys.
    next_key: u64,
}

/// Shared state behind [`Promise`] and [`EventFuture`].
pub(crate) struct Inner<T> {
    /// Lifecycle state (`PENDING`, `SUCCESS`, ...). See [`super::state`].
    pub(crate) state: AtomicU8,

    /// Written exactly once, by the completer that won the state CAS.
    outcome: OnceLock<Outcome<T>>,

    /// Listeners and wakers.
    pub(crate) monitor: Mutex<Monitor<T>>,

    /// Signalled when the promise reaches a terminal state.
    pub(crate) done: Condvar,

    /// Executor used to notify listeners and to detect self-deadlock.
    pub(crate) executor: Option<Arc<dyn EventExecutor>>,

    /// Whether anyone looked at the outcome or subscribed to it.
    pub(crate) observed: AtomicBool,
}

impl<T> Inner<T> {
    fn new(executor: Option<Arc<dyn EventExecutor>>) -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            outcome: OnceLock::new(),
            monitor: Mutex::new(Monitor {
                listeners: Listeners::Empty,
                notifying: false,
                wakers: Vec::new(),
                next_key: 0,
            }),
            done: Condvar::new(),
            executor,
            observed: AtomicBool::new(false),
        }
    }

    pub(crate) fn load_state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    /// Returns the outcome once the promise is terminal.
    pub(crate) fn outcome(&self) -> Option<&Outcome<T>> {
        if is_terminal(self.load_state()) {
            self.outcome.get()
        } else {
            None
        }
    }

    pub(crate) fn mark_observed(&self) {
        self.observed.store(true, Ordering::Relaxed);
    }

    pub(crate) fn next_listener_key(monitor: &mut Monitor<T>) -> ListenerKey {
        monitor.next_key += 1;
        ListenerKey(monitor.next_key)
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() != FAILURE || *self.observed.get_mut() {
            return;
        }

        if let Some(Outcome::Failure(cause)) = self.outcome.get() {
            tracing::warn!(
                error = %cause,
                "a failed promise was dropped and nobody observed its failure"
            );
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Inner<T> {
    /// Single CAS from a pending state to `COMPLETING`, then publication.
    ///
    /// Cancellation only wins from `PENDING`; a value or failure also wins
    /// from `UNCANCELLABLE`.
    pub(crate) fn try_complete(self: &Arc<Self>, outcome: Outcome<T>) -> bool {
        let cancelling = matches!(outcome, Outcome::Cancelled);

        loop {
            let current = self.load_state();
            let allowed = current == PENDING || (current == UNCANCELLABLE && !cancelling);

            if !allowed {
                return false;
            }

            if self
                .state
                .compare_exchange(current, COMPLETING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        let terminal = outcome.state();
        // Only the CAS winner reaches this point, so the cell is empty.
        let _ = self.outcome.set(outcome);
        self.state.store(terminal, Ordering::Release);

        let (wakers, has_listeners) = {
            let mut monitor = self.monitor.lock();
            self.done.notify_all();
            (
                std::mem::take(&mut monitor.wakers),
                !monitor.listeners.is_empty(),
            )
        };

        for waker in wakers {
            waker.wake();
        }

        if has_listeners {
            notify_listeners(self);
        }

        true
    }

    pub(crate) fn set_uncancellable(&self) -> bool {
        if self
            .state
            .compare_exchange(PENDING, UNCANCELLABLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return true;
        }

        let mut state = self.load_state();
        while state == COMPLETING {
            std::hint::spin_loop();
            state = self.load_state();
        }

        state != CANCELLED
    }
}

/// Delivers the listeners of a completed promise.
///
/// On the owning executor's thread listeners run inline, as long as the
/// per-thread nesting stays under the configured depth. Otherwise the
/// notification is handed to the executor as a new task. Promises without
/// an executor run inline and defer to the outermost frame once too deep.
pub(crate) fn notify_listeners<T: Clone + Send + Sync + 'static>(inner: &Arc<Inner<T>>) {
    match &inner.executor {
        Some(executor) => {
            if executor.in_event_loop() {
                if let Some(_frame) = enter_listener_frame() {
                    notify_listeners_now(inner);
                    return;
                }
            }

            let pending = inner.clone();
            if let Err(e) = executor.execute(Box::new(move || notify_listeners_now(&pending))) {
                tracing::error!(
                    error = %e,
                    "failed to submit a listener notification task, event loop shut down?"
                );
            }
        }
        None => {
            if let Some(_frame) = enter_listener_frame() {
                notify_listeners_now(inner);
                return;
            }

            let pending = inner.clone();
            run_or_defer(Box::new(move || notify_listeners_now(&pending)));
        }
    }
}

/// Runs notification passes until no listener is left.
///
/// Listeners added while a pass is running (from a listener, or from another
/// thread) are appended and picked up by the next pass of the thread that
/// is already notifying, which keeps delivery in add order.
fn notify_listeners_now<T: Clone + Send + Sync + 'static>(inner: &Arc<Inner<T>>) {
    let mut listeners = {
        let mut monitor = inner.monitor.lock();

        if monitor.notifying || monitor.listeners.is_empty() {
            return;
        }

        monitor.notifying = true;
        monitor.listeners.take()
    };

    let future = EventFuture::from_inner(inner.clone());

    loop {
        listeners.notify(&future);

        let mut monitor = inner.monitor.lock();

        if monitor.listeners.is_empty() {
            monitor.notifying = false;
            return;
        }

        listeners = monitor.listeners.take();
    }
}

/// A writable, one-shot completion cell.
///
/// A `Promise` is completed exactly once, by whichever of
/// [`try_success`](Self::try_success), [`try_failure`](Self::try_failure) or
/// [`cancel`](EventFuture::cancel) wins the race. Every read-side
/// operation is available through [`Deref`] to [`EventFuture`].
///
/// # Examples
///
/// ```rust
/// use eventide::Promise;
///
/// let promise = Promise::new();
/// let future = promise.future();
///
/// assert!(promise.try_success(7));
/// assert!(!promise.try_success(8));
/// assert_eq!(future.get().unwrap(), 7);
/// ```
pub struct Promise<T> {
    future: EventFuture<T>,
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// Creates a promise with no owning executor.
    ///
    /// Listeners of such a promise run on the completing thread.
    pub fn new() -> Self {
        Self::from_inner(Arc::new(Inner::new(None)))
    }

    /// Creates a promise owned by `executor`.
    ///
    /// Listeners are notified on the executor's thread, and blocking waits
    /// from that thread are refused.
    pub fn with_executor(executor: Arc<dyn EventExecutor>) -> Self {
        Self::from_inner(Arc::new(Inner::new(Some(executor))))
    }

    fn from_inner(inner: Arc<Inner<T>>) -> Self {
        Self {
            future: EventFuture::from_inner(inner),
        }
    }

    /// Returns a read-only view of this promise.
    pub fn future(&self) -> EventFuture<T> {
        self.future.clone()
    }

    /// Completes the promise with `value`. Returns `false` if already completed.
    pub fn try_success(&self, value: T) -> bool {
        self.future.inner.try_complete(Outcome::Success(value))
    }

    /// Completes the promise with `cause`. Returns `false` if already completed.
    pub fn try_failure(&self, cause: Cause) -> bool {
        self.future.inner.try_complete(Outcome::Failure(cause))
    }

    /// Completes the promise with `value`.
    ///
    /// # Errors
    ///
    /// [`Error::IllegalState`] if the promise was already completed.
    pub fn set_success(&self, value: T) -> Result<(), Error> {
        if self.try_success(value) {
            Ok(())
        } else {
            Err(Error::illegal_state(format!("complete already: {self:?}")))
        }
    }

    /// Completes the promise with `cause`.
    ///
    /// # Errors
    ///
    /// [`Error::IllegalState`] if the promise was already completed.
    pub fn set_failure(&self, cause: Cause) -> Result<(), Error> {
        if self.try_failure(cause) {
            Ok(())
        } else {
            Err(Error::illegal_state(format!("complete already: {self:?}")))
        }
    }

    /// Forbids cancellation from now on.
    ///
    /// Returns `true` if the promise is now uncancellable, or already
    /// completed without being cancelled; `false` if it was cancelled.
    pub fn set_uncancellable(&self) -> bool {
        self.future.inner.set_uncancellable()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            future: self.future.clone(),
        }
    }
}

impl<T> Deref for Promise<T> {
    type Target = EventFuture<T>;

    fn deref(&self) -> &EventFuture<T> {
        &self.future
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Promise({:?})", self.future)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listeners_are_promoted_from_inline_storage() {
        let promise: Promise<u8> = Promise::new();
        promise.add_listener(|_| {});
        assert!(matches!(
            promise.inner.monitor.lock().listeners,
            Listeners::One(_)
        ));

        promise.add_listener(|_| {});
        assert!(matches!(
            promise.inner.monitor.lock().listeners,
            Listeners::Many(ref list) if list.len() == 2
        ));
    }

    #[test]
    fn completing_state_is_not_done() {
        let promise: Promise<u8> = Promise::new();
        promise.inner.state.store(COMPLETING, Ordering::Release);
        assert!(!promise.is_done());
        assert!(!promise.try_success(1));
        promise.inner.state.store(PENDING, Ordering::Release);
        assert!(promise.try_success(1));
    }
}

