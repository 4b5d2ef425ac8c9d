/// The promise is waiting for its producer.
pub(crate) const PENDING: u8 = 0;

/// Still pending, but [`cancel`](super::EventFuture::cancel) is no longer
/// allowed to win.
pub(crate) const UNCANCELLABLE: u8 = 1;

/// A completer won the race and is publishing the outcome.
///
/// Never observable as done. Lasts only between the winning CAS and the
/// store of the terminal state.
pub(crate) const COMPLETING: u8 = 2;

/// Completed with a value.
pub(crate) const SUCCESS: u8 = 3;

/// Completed with a failure cause.
pub(crate) const FAILURE: u8 = 4;

/// Completed by cancellation.
pub(crate) const CANCELLED: u8 = 5;

/// Whether `state` is one of the three terminal states.
pub(crate) fn is_terminal(state: u8) -> bool {
    state >= SUCCESS
}

/// Human readable state name, used by `Debug` impls.
pub(crate) fn name(state: u8) -> &'static str {
    match state {
        PENDING => "pending",
        UNCANCELLABLE => "uncancellable",
        COMPLETING => "completing",
        SUCCESS => "success",
        FAILURE => "failure",
        CANCELLED => "cancelled",
        _ => "unknown",
    }
}
