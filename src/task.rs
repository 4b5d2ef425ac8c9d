//! Units of work accepted by executors and timers.

use crate::error::TaskPanicked;

use std::panic::{self, AssertUnwindSafe};

/// A unit of work that can be executed once by an executor.
///
/// `Runnable` abstracts the concrete closure type so executors can keep a
/// heterogeneous queue of work through [`Task`]. Any `FnOnce() + Send`
/// closure is a `Runnable`.
pub trait Runnable: Send + 'static {
    /// Executes the work. Called at most once, on the executor's worker thread.
    fn run(self: Box<Self>);
}

impl<F> Runnable for F
where
    F: FnOnce() + Send + 'static,
{
    fn run(self: Box<Self>) {
        (*self)()
    }
}

/// An owned, type-erased unit of work.
pub type Task = Box<dyn Runnable>;

/// Runs `f`, converting a panic into [`TaskPanicked`].
pub(crate) fn catch_panic<R>(f: impl FnOnce() -> R) -> Result<R, TaskPanicked> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(TaskPanicked::from_payload)
}

/// Runs a task at a worker boundary.
///
/// Panics are logged and swallowed so that a single failing task cannot
/// take the worker loop down with it.
pub(crate) fn run_guarded(task: Task) {
    if let Err(panicked) = catch_panic(move || task.run()) {
        tracing::error!(error = %panicked, "a task raised an exception, continuing");
    }
}
