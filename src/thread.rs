//! Thread creation for executor and timer workers.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

/// The body a worker thread runs.
pub type ThreadBody = Box<dyn FnOnce() + Send + 'static>;

/// Creates the threads that back executors and timers.
///
/// Implementations decide naming, stack size, or any per-thread setup.
pub trait ThreadFactory: Send + Sync + 'static {
    /// Spawns a new thread running `body`.
    fn new_thread(&self, body: ThreadBody) -> io::Result<JoinHandle<()>>;
}

/// Spawns named threads: `{prefix}-{n}`, `n` counting from 1.
#[derive(Debug)]
pub struct DefaultThreadFactory {
    prefix: String,
    next_id: AtomicUsize,
    stack_size: Option<usize>,
}

impl DefaultThreadFactory {
    /// Creates a factory naming its threads after `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next_id: AtomicUsize::new(1),
            stack_size: None,
        }
    }

    /// Sets the stack size of spawned threads, in bytes.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

impl ThreadFactory for DefaultThreadFactory {
    fn new_thread(&self, body: ThreadBody) -> io::Result<JoinHandle<()>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut builder = thread::Builder::new().name(format!("{}-{}", self.prefix, id));

        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }

        builder.spawn(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threads_are_named_sequentially() {
        let factory = DefaultThreadFactory::new("worker");

        let first = factory
            .new_thread(Box::new(|| {
                assert_eq!(thread::current().name(), Some("worker-1"));
            }))
            .unwrap();
        first.join().unwrap();

        let second = factory
            .new_thread(Box::new(|| {
                assert_eq!(thread::current().name(), Some("worker-2"));
            }))
            .unwrap();
        second.join().unwrap();
    }
}
