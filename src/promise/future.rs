use super::core::{Inner, Outcome, notify_listeners};
use super::listener::{Listener, ListenerKey};
use super::state::{self, CANCELLED, FAILURE, PENDING, SUCCESS, is_terminal};
use crate::error::{Cause, Error};

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// The read side of a [`Promise`](super::Promise).
///
/// An `EventFuture` can be queried, waited on, subscribed to with
/// listeners, or awaited from async code. Cloning is cheap and every clone
/// observes the same outcome.
pub struct EventFuture<T> {
    pub(crate) inner: Arc<Inner<T>>,
}

impl<T> EventFuture<T> {
    pub(crate) fn from_inner(inner: Arc<Inner<T>>) -> Self {
        Self { inner }
    }

    /// Whether the future reached a terminal state.
    pub fn is_done(&self) -> bool {
        is_terminal(self.inner.load_state())
    }

    /// Whether the future completed with a value.
    pub fn is_success(&self) -> bool {
        self.inner.load_state() == SUCCESS
    }

    /// Whether the future completed by cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.inner.load_state() == CANCELLED
    }

    /// Whether [`cancel`](Self::cancel) can still succeed.
    pub fn is_cancellable(&self) -> bool {
        self.inner.load_state() == PENDING
    }

    /// The failure cause, if the future failed or was cancelled.
    pub fn cause(&self) -> Option<Cause> {
        self.inner.mark_observed();

        match self.inner.outcome()? {
            Outcome::Success(_) => None,
            Outcome::Failure(cause) => Some(cause.clone()),
            Outcome::Cancelled => Some(Arc::new(Error::Cancelled)),
        }
    }

    /// Blocks until the future is done.
    ///
    /// # Errors
    ///
    /// [`Error::IllegalState`] when called from the owning executor's thread
    /// while the future is still pending: that thread is the one that would
    /// have to complete it.
    pub fn wait(&self) -> Result<(), Error> {
        if self.is_done() {
            return Ok(());
        }

        self.check_deadlock()?;

        let mut monitor = self.inner.monitor.lock();
        while !self.is_done() {
            self.inner.done.wait(&mut monitor);
        }

        Ok(())
    }

    /// Blocks until the future is done or `timeout` elapses.
    ///
    /// Returns whether the future is done.
    ///
    /// # Errors
    ///
    /// Same as [`wait`](Self::wait).
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, Error> {
        if self.is_done() {
            return Ok(true);
        }

        if timeout.is_zero() {
            return Ok(false);
        }

        self.check_deadlock()?;

        let deadline = Instant::now() + timeout;
        let mut monitor = self.inner.monitor.lock();

        while !self.is_done() {
            if self
                .inner
                .done
                .wait_until(&mut monitor, deadline)
                .timed_out()
            {
                return Ok(self.is_done());
            }
        }

        Ok(true)
    }

    /// Same as [`wait`](Self::wait).
    ///
    /// Threads cannot be interrupted, so there is nothing to ignore; kept
    /// for callers that spell out the intent.
    pub fn wait_uninterruptibly(&self) -> Result<(), Error> {
        self.wait()
    }

    /// Same as [`wait_timeout`](Self::wait_timeout).
    pub fn wait_uninterruptibly_timeout(&self, timeout: Duration) -> Result<bool, Error> {
        self.wait_timeout(timeout)
    }

    fn check_deadlock(&self) -> Result<(), Error> {
        match &self.inner.executor {
            Some(executor) if executor.in_event_loop() => Err(Error::illegal_state(
                "blocking wait on the future's own event loop would deadlock",
            )),
            _ => Ok(()),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> EventFuture<T> {
    /// Attempts to cancel the future.
    ///
    /// Cancellation is cooperative: nothing interrupts work that is already
    /// running, whatever `may_interrupt` says. Returns whether this call
    /// cancelled the future.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        let _ = may_interrupt;
        self.inner.try_complete(Outcome::Cancelled)
    }

    /// Registers `listener`, to be called once the future is done.
    ///
    /// If the future is already done the listener is notified right away
    /// (inline on the owning executor's thread, otherwise through that
    /// executor). Listeners always run in the order they were added.
    pub fn add_listener<F>(&self, listener: F) -> ListenerKey
    where
        F: FnOnce(&EventFuture<T>) + Send + 'static,
    {
        self.inner.mark_observed();

        let key = {
            let mut monitor = self.inner.monitor.lock();
            let key = Inner::next_listener_key(&mut monitor);
            monitor.listeners.push(Listener::new(key, Box::new(listener)));
            key
        };

        if self.is_done() {
            notify_listeners(&self.inner);
        }

        key
    }

    /// Removes a listener that has not been notified yet.
    ///
    /// Returns whether it was still registered.
    pub fn remove_listener(&self, key: ListenerKey) -> bool {
        self.inner.monitor.lock().listeners.remove(key)
    }

    /// The value, if the future completed successfully. Never blocks.
    pub fn get_now(&self) -> Option<T> {
        self.inner.mark_observed();

        match self.inner.outcome()? {
            Outcome::Success(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Blocks until done and returns the value.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] if cancelled, [`Error::Failed`] with the stored
    /// cause if failed, [`Error::IllegalState`] on self-deadlock.
    pub fn get(&self) -> Result<T, Error> {
        self.wait()?;
        self.result()
    }

    /// Like [`get`](Self::get), bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get), plus [`Error::TimedOut`].
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, Error> {
        if !self.wait_timeout(timeout)? {
            return Err(Error::TimedOut);
        }

        self.result()
    }

    /// Blocks until done and surfaces a failure or cancellation as an error.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get).
    pub fn sync(&self) -> Result<(), Error> {
        self.get().map(|_| ())
    }

    /// Like [`sync`](Self::sync), bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// As [`get_timeout`](Self::get_timeout).
    pub fn sync_timeout(&self, timeout: Duration) -> Result<(), Error> {
        self.get_timeout(timeout).map(|_| ())
    }

    /// Same as [`sync`](Self::sync).
    pub fn sync_uninterruptibly(&self) -> Result<(), Error> {
        self.sync()
    }

    /// Reads the outcome of a done future.
    fn result(&self) -> Result<T, Error> {
        self.inner.mark_observed();

        match self.inner.outcome() {
            Some(Outcome::Success(value)) => Ok(value.clone()),
            Some(Outcome::Failure(cause)) => Err(Error::Failed(cause.clone())),
            Some(Outcome::Cancelled) => Err(Error::Cancelled),
            None => Err(Error::illegal_state("future is not done")),
        }
    }
}

impl<T> Clone for EventFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for EventFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.load_state();

        match (state, self.inner.outcome()) {
            (FAILURE, Some(Outcome::Failure(cause))) => {
                write!(f, "EventFuture(failure: {cause})")
            }
            _ => write!(f, "EventFuture({})", state::name(state)),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Future for EventFuture<T> {
    /// The value, or why there is none.
    type Output = Result<T, Error>;

    /// Polls the future.
    ///
    /// The waker is registered under the monitor lock and the state is
    /// checked again afterwards, so a completion racing with registration
    /// cannot be missed.
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.is_done() {
            return Poll::Ready(self.result());
        }

        let mut monitor = self.inner.monitor.lock();

        if self.is_done() {
            drop(monitor);
            return Poll::Ready(self.result());
        }

        self.inner.mark_observed();

        if !monitor.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            monitor.wakers.push(cx.waker().clone());
        }

        Poll::Pending
    }
}
