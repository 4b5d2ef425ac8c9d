use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Source of executor identifiers. Zero means "no executor".
static NEXT_EXECUTOR_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// Identifier of the executor whose worker is the current thread.
    ///
    /// Set once when a worker thread starts, and never changed: a worker
    /// thread belongs to exactly one executor for its whole life.
    static CURRENT_EXECUTOR: Cell<usize> = const { Cell::new(0) };
}

/// Allocates a process-unique executor identifier.
pub(crate) fn next_executor_id() -> usize {
    NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed)
}

/// Marks the current thread as the worker of executor `id`.
pub(crate) fn enter_worker(id: usize) {
    CURRENT_EXECUTOR.with(|current| current.set(id));
}

/// Whether the current thread is the worker of executor `id`.
pub(crate) fn is_worker_of(id: usize) -> bool {
    CURRENT_EXECUTOR.with(Cell::get) == id
}
