use super::core::{Shared, SingleThreadEventExecutor};
use crate::config;
use crate::thread::{DefaultThreadFactory, ThreadFactory};
use crate::ticker::{Ticker, system_ticker};

use std::sync::Arc;
use std::time::Duration;

/// Configures a [`SingleThreadEventExecutor`].
///
/// ```rust
/// use eventide::executor::SingleThreadEventExecutor;
/// use std::time::Duration;
///
/// let executor = SingleThreadEventExecutor::builder()
///     .thread_name("io")
///     .max_pending_tasks(1024)
///     .suspend_after_idle(Duration::from_secs(30))
///     .build();
/// # drop(executor);
/// ```
pub struct EventExecutorBuilder {
    thread_factory: Option<Arc<dyn ThreadFactory>>,
    thread_name: String,
    ticker: Arc<dyn Ticker>,
    max_pending_tasks: Option<usize>,
    suspend_after_idle: Option<Duration>,
}

impl EventExecutorBuilder {
    /// Creates a builder with default settings: worker threads named
    /// `eventide-executor-{n}`, the system ticker, no idle suspension and
    /// the queue bound from `EVENTIDE_MAX_PENDING_TASKS`.
    pub fn new() -> Self {
        Self {
            thread_factory: None,
            thread_name: "eventide-executor".to_owned(),
            ticker: system_ticker(),
            max_pending_tasks: config::default_max_pending_tasks(),
            suspend_after_idle: None,
        }
    }

    /// Uses `factory` to spawn the worker thread. Overrides `thread_name`.
    pub fn thread_factory(mut self, factory: Arc<dyn ThreadFactory>) -> Self {
        self.thread_factory = Some(factory);
        self
    }

    /// Prefix of the worker thread names when no factory is given.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Clock used for scheduled deadlines, the shutdown quiet period and
    /// idle tracking.
    pub fn ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = ticker;
        self
    }

    /// Bounds the task queue; submissions beyond it are rejected.
    ///
    /// # Panics
    ///
    /// Panics if `max == 0`.
    pub fn max_pending_tasks(mut self, max: usize) -> Self {
        assert!(max > 0, "max_pending_tasks must be > 0");

        self.max_pending_tasks = Some(max);
        self
    }

    /// Lets the worker thread exit after idling for `idle`.
    ///
    /// The next submission starts a new worker thread.
    pub fn suspend_after_idle(mut self, idle: Duration) -> Self {
        self.suspend_after_idle = Some(idle);
        self
    }

    /// Builds the executor. Its worker thread starts with the first
    /// submission.
    pub fn build(self) -> SingleThreadEventExecutor {
        let thread_factory = self
            .thread_factory
            .unwrap_or_else(|| Arc::new(DefaultThreadFactory::new(self.thread_name)));

        SingleThreadEventExecutor::from_shared(Shared::new(
            thread_factory,
            self.ticker,
            self.max_pending_tasks,
            self.suspend_after_idle,
        ))
    }
}

impl Default for EventExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
