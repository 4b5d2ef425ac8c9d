//! Task executors.
//!
//! [`SingleThreadEventExecutor`] confines every task it runs to one worker
//! thread and adds deadline-ordered scheduling on top of its run queue.
//! [`ImmediateExecutor`] runs tasks on the calling thread.

mod builder;
mod context;
mod core;
mod heap;
mod scheduled;
mod state;
mod worker;

pub use self::core::{
    DEFAULT_SHUTDOWN_QUIET_PERIOD, DEFAULT_SHUTDOWN_TIMEOUT, SingleThreadEventExecutor,
};
pub use builder::EventExecutorBuilder;
pub use scheduled::ScheduledFuture;

use crate::error::Error;
use crate::task::{Task, run_guarded};

/// Accepts tasks for execution.
pub trait Executor: Send + Sync + 'static {
    /// Submits `task`.
    ///
    /// # Errors
    ///
    /// [`Error::Rejected`] if the task cannot be accepted.
    fn execute(&self, task: Task) -> Result<(), Error>;
}

/// An executor bound to a single thread, its event loop.
pub trait EventExecutor: Executor {
    /// Whether the calling thread is this executor's event loop.
    fn in_event_loop(&self) -> bool;
}

/// Runs every task inline, on the submitting thread.
///
/// A panicking task is logged and swallowed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateExecutor;

impl Executor for ImmediateExecutor {
    fn execute(&self, task: Task) -> Result<(), Error> {
        run_guarded(task);
        Ok(())
    }
}
