//! Completion and scheduling primitives for event-driven services.
//!
//! - [`Promise`] / [`EventFuture`]: one-shot completion cells with ordered,
//!   recursion-safe listener notification, blocking waits and `async` support.
//! - [`executor::SingleThreadEventExecutor`]: runs tasks one at a time on a
//!   single worker thread, with deadline-ordered scheduling and graceful
//!   shutdown.
//! - [`timer::HashedWheelTimer`]: a coarse timer for very large numbers of
//!   one-shot timeouts.
//!
//! The crate logs through [`tracing`] and never installs a subscriber.

mod utils;

pub mod config;
pub mod error;
pub mod executor;
pub mod promise;
pub mod task;
pub mod thread;
pub mod ticker;
pub mod timer;

pub use error::{Cause, Error, TaskPanicked};
pub use executor::{EventExecutor, Executor, SingleThreadEventExecutor};
pub use promise::{EventFuture, ListenerKey, Promise};
pub use task::{Runnable, Task};
pub use timer::{HashedWheelTimer, Timeout};
