use super::EventFuture;
use crate::task::catch_panic;

/// Identifies a listener registered on a promise, for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(pub(crate) u64);

/// Callback invoked once the promise completes.
pub(crate) type Callback<T> = Box<dyn FnOnce(&EventFuture<T>) + Send + 'static>;

pub(crate) struct Listener<T> {
    key: ListenerKey,
    callback: Callback<T>,
}

impl<T> Listener<T> {
    pub(crate) fn new(key: ListenerKey, callback: Callback<T>) -> Self {
        Self { key, callback }
    }
}

/// Listeners waiting on a promise, in registration order.
///
/// Most promises carry zero or one listener, so the first one is stored
/// inline and the list is only allocated on the second registration.
pub(crate) enum Listeners<T> {
    Empty,
    One(Listener<T>),
    Many(Vec<Listener<T>>),
}

impl<T> Listeners<T> {
    pub(crate) fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::One(_) => false,
            Self::Many(list) => list.is_empty(),
        }
    }

    pub(crate) fn push(&mut self, listener: Listener<T>) {
        match std::mem::replace(self, Self::Empty) {
            Self::Empty => *self = Self::One(listener),
            Self::One(first) => *self = Self::Many(vec![first, listener]),
            Self::Many(mut list) => {
                list.push(listener);
                *self = Self::Many(list);
            }
        }
    }

    /// Removes the listener registered under `key`.
    pub(crate) fn remove(&mut self, key: ListenerKey) -> bool {
        match self {
            Self::Empty => false,
            Self::One(listener) if listener.key == key => {
                *self = Self::Empty;
                true
            }
            Self::One(_) => false,
            Self::Many(list) => match list.iter().position(|l| l.key == key) {
                Some(index) => {
                    list.remove(index);
                    true
                }
                None => false,
            },
        }
    }

    /// Moves every listener out, leaving `self` empty.
    pub(crate) fn take(&mut self) -> Self {
        std::mem::replace(self, Self::Empty)
    }

    /// Invokes every listener in order.
    ///
    /// A panicking listener is logged and does not prevent the following
    /// ones from running.
    pub(crate) fn notify(self, future: &EventFuture<T>) {
        match self {
            Self::Empty => {}
            Self::One(listener) => notify_one(listener, future),
            Self::Many(list) => {
                for listener in list {
                    notify_one(listener, future);
                }
            }
        }
    }
}

fn notify_one<T>(listener: Listener<T>, future: &EventFuture<T>) {
    let callback = listener.callback;

    if let Err(panicked) = catch_panic(|| callback(future)) {
        tracing::warn!(error = %panicked, "a promise listener panicked");
    }
}
