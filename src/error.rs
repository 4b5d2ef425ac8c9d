//! Error types shared by promises, executors and timers.

use std::any::Any;
use std::sync::Arc;

use thiserror::Error;

/// The stored reason a promise failed.
///
/// Causes are shared between every handle observing the same promise,
/// hence the `Arc`.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by this crate.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// An argument was outside its accepted range (non-positive period, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not legal in the current state of the receiver.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The work was not accepted (shutdown, queue full, too many timeouts).
    #[error("rejected: {0}")]
    Rejected(String),

    /// The future was cancelled before it completed.
    #[error("operation was cancelled")]
    Cancelled,

    /// A bounded wait elapsed before the future completed.
    #[error("timed out waiting for completion")]
    TimedOut,

    /// The future completed with a failure.
    #[error("operation failed: {0}")]
    Failed(Cause),
}

impl Error {
    pub(crate) fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    pub(crate) fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Returns the stored cause if this error wraps a promise failure.
    pub fn cause(&self) -> Option<&Cause> {
        match self {
            Self::Failed(cause) => Some(cause),
            _ => None,
        }
    }
}

/// A task panicked while running on a worker thread.
///
/// The panic payload is rendered to a string when it is a `&str` or a
/// `String`; other payloads are reported as opaque.
#[derive(Debug, Clone, Error)]
#[error("task panicked: {message}")]
pub struct TaskPanicked {
    /// Rendered panic payload.
    pub message: String,
}

impl TaskPanicked {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };

        Self { message }
    }

    pub(crate) fn into_cause(self) -> Cause {
        Arc::new(self)
    }
}
