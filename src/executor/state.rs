/// No worker thread was ever started.
pub(crate) const NOT_STARTED: u8 = 1;

/// The idle worker decided to exit and is re-checking for late submissions.
pub(crate) const SUSPENDING: u8 = 2;

/// The worker thread exited after idling; the next submission starts a new one.
pub(crate) const SUSPENDED: u8 = 3;

/// A worker thread is running the loop.
pub(crate) const STARTED: u8 = 4;

/// Graceful shutdown requested; submissions are still accepted.
pub(crate) const SHUTTING_DOWN: u8 = 5;

/// Submissions are rejected; the worker drains what is left.
pub(crate) const SHUTDOWN: u8 = 6;

/// The worker exited and the termination future is complete.
pub(crate) const TERMINATED: u8 = 7;
