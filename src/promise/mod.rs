//! One-shot completion cells with ordered listener notification.
//!
//! A [`Promise`] is the writable side, an [`EventFuture`] the read side.
//! Both are thin handles over the same shared state:
//!
//! - a lifecycle state moved out of pending exactly once, by CAS,
//! - the published outcome (value, failure cause, or cancellation),
//! - listeners, notified in the order they were added,
//! - blocked threads and async wakers waiting for completion.
//!
//! Listener notification is recursion-safe: chains of promises completing
//! each other from listeners are bounded by a per-thread depth counter
//! (see [`crate::config::max_listener_stack_depth`]) and continue from a
//! shallower frame once the limit is reached.

mod context;
mod core;
mod future;
mod listener;
mod state;

pub use self::core::Promise;
pub use future::EventFuture;
pub use listener::ListenerKey;
