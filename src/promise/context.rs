use crate::config::max_listener_stack_depth;
use crate::task::{Task, run_guarded};

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

thread_local! {
    /// How many listener notifications are currently nested on this thread.
    static LISTENER_DEPTH: Cell<usize> = const { Cell::new(0) };

    /// Whether this thread is draining deferred notifications.
    static DRAINING: Cell<bool> = const { Cell::new(false) };

    /// Notifications deferred because the stack was already too deep.
    ///
    /// Drained by the outermost [`run_or_defer`] frame on this thread.
    static DEFERRED: RefCell<VecDeque<Task>> = const { RefCell::new(VecDeque::new()) };
}

/// Marks one nested notification frame; decrements the depth on drop.
pub(crate) struct DepthGuard(());

impl Drop for DepthGuard {
    fn drop(&mut self) {
        LISTENER_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Enters a nested notification frame if the per-thread depth allows it.
///
/// Returns `None` once [`max_listener_stack_depth`] frames are active, in
/// which case the caller must hand the notification off instead of
/// recursing.
pub(crate) fn enter_listener_frame() -> Option<DepthGuard> {
    LISTENER_DEPTH.with(|depth| {
        let current = depth.get();

        if current >= max_listener_stack_depth() {
            return None;
        }

        depth.set(current + 1);
        Some(DepthGuard(()))
    })
}

/// Runs `task` now, or queues it if this thread is already draining.
///
/// Used for promises without an owning executor: once the depth limit is
/// hit, the task runs from the outermost frame rather than deeper in the
/// stack.
pub(crate) fn run_or_defer(task: Task) {
    if DRAINING.with(Cell::get) {
        DEFERRED.with(|queue| queue.borrow_mut().push_back(task));
        return;
    }

    DRAINING.with(|draining| draining.set(true));

    run_guarded(task);

    while let Some(next) = DEFERRED.with(|queue| queue.borrow_mut().pop_front()) {
        run_guarded(next);
    }

    DRAINING.with(|draining| draining.set(false));
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    #[test]
    fn depth_is_bounded_and_restored() {
        let mut guards = Vec::new();
        while let Some(guard) = enter_listener_frame() {
            guards.push(guard);
        }
        assert_eq!(guards.len(), max_listener_stack_depth());

        guards.clear();
        assert!(enter_listener_frame().is_some());
    }

    #[test]
    fn nested_tasks_run_after_outer_task() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let outer = order.clone();
        run_or_defer(Box::new(move || {
            outer.lock().unwrap().push(1);

            let inner = outer.clone();
            run_or_defer(Box::new(move || inner.lock().unwrap().push(3)));

            outer.lock().unwrap().push(2);
        }));

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }
}
