use eventide::executor::{Executor, ImmediateExecutor, SingleThreadEventExecutor};
use eventide::thread::{DefaultThreadFactory, ThreadBody, ThreadFactory};
use eventide::{Error, EventExecutor};

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Fails its first spawn, then behaves like the default factory.
struct FlakyThreadFactory {
    failed: AtomicBool,
    inner: DefaultThreadFactory,
}

impl ThreadFactory for FlakyThreadFactory {
    fn new_thread(&self, body: ThreadBody) -> io::Result<JoinHandle<()>> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(io::Error::other("no threads"));
        }

        self.inner.new_thread(body)
    }
}

fn shutdown_now(executor: &SingleThreadEventExecutor) {
    executor
        .shutdown_gracefully(Duration::ZERO, Duration::ZERO)
        .unwrap()
        .sync()
        .unwrap();
}

#[test]
fn test_tasks_run_in_submission_order_on_one_thread() {
    let executor = SingleThreadEventExecutor::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    for i in 0..100 {
        let seen = seen.clone();
        executor
            .execute(Box::new(move || {
                seen.lock().unwrap().push((i, thread::current().id()));
            }))
            .unwrap();
    }

    shutdown_now(&executor);

    let seen = seen.lock().unwrap();
    let order: Vec<i32> = seen.iter().map(|(i, _)| *i).collect();
    assert_eq!(order, (0..100).collect::<Vec<_>>());
    assert!(
        seen.iter().all(|(_, id)| *id == seen[0].1),
        "every task must run on the same worker thread"
    );
}

#[test]
fn test_concurrent_submitters_keep_per_thread_order() {
    let executor = SingleThreadEventExecutor::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let executor = executor.clone();
            let seen = seen.clone();

            thread::spawn(move || {
                for i in 0..250 {
                    let seen = seen.clone();
                    executor
                        .execute(Box::new(move || seen.lock().unwrap().push((producer, i))))
                        .unwrap();
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }

    shutdown_now(&executor);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1000);

    for producer in 0..4 {
        let mine: Vec<i32> = seen
            .iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, i)| *i)
            .collect();
        assert_eq!(mine, (0..250).collect::<Vec<_>>());
    }
}

#[test]
fn test_submit_returns_value_and_captures_panics() {
    let executor = SingleThreadEventExecutor::new();

    let value = executor.submit(|| "forty-two".len()).unwrap();
    assert_eq!(value.get().unwrap(), 9);

    let failed = executor.submit(|| -> u8 { panic!("task failure") }).unwrap();
    match failed.get() {
        Err(Error::Failed(cause)) => assert!(cause.to_string().contains("task failure")),
        other => panic!("unexpected outcome: {other:?}"),
    }

    // The worker survived the panic.
    assert_eq!(executor.submit(|| 1 + 1).unwrap().get().unwrap(), 2);

    shutdown_now(&executor);
}

#[test]
fn test_panicking_task_does_not_kill_the_worker() {
    let executor = SingleThreadEventExecutor::new();

    executor
        .execute(Box::new(|| panic!("fire and forget failure")))
        .unwrap();

    let (tx, rx) = mpsc::channel();
    executor.execute(Box::new(move || tx.send(()).unwrap())).unwrap();

    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    shutdown_now(&executor);
}

#[test]
fn test_graceful_shutdown_runs_pending_task_then_rejects() {
    let executor = SingleThreadEventExecutor::new();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let ran = Arc::new(AtomicUsize::new(0));

    // Hold the worker so the second task is still pending at shutdown.
    executor
        .execute(Box::new(move || {
            gate_rx.recv_timeout(Duration::from_secs(5)).ok();
        }))
        .unwrap();

    let pending = ran.clone();
    executor
        .execute(Box::new(move || {
            pending.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

    let termination = executor
        .shutdown_gracefully(Duration::ZERO, Duration::ZERO)
        .unwrap();
    assert!(executor.is_shutting_down());

    gate_tx.send(()).unwrap();
    termination.sync().unwrap();

    assert_eq!(ran.load(Ordering::SeqCst), 1, "the pending task must run first");
    assert!(executor.is_shutdown());
    assert!(executor.is_terminated());

    let rejected = executor.execute(Box::new(|| {}));
    assert!(matches!(rejected, Err(Error::Rejected(_))));
    assert!(matches!(executor.submit(|| 0u8), Err(Error::Rejected(_))));
}

#[test]
fn test_shutdown_of_unstarted_executor_terminates() {
    let executor = SingleThreadEventExecutor::new();

    let termination = executor
        .shutdown_gracefully(Duration::ZERO, Duration::from_millis(10))
        .unwrap();

    assert!(termination.wait_timeout(Duration::from_secs(5)).unwrap());
    assert!(executor.is_terminated());
    assert!(executor.await_termination(Duration::ZERO).unwrap());
}

#[test]
fn test_shutdown_rejects_timeout_below_quiet_period() {
    let executor = SingleThreadEventExecutor::new();

    let result = executor.shutdown_gracefully(Duration::from_secs(2), Duration::from_secs(1));
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert!(!executor.is_shutting_down());
}

#[test]
fn test_shutdown_is_idempotent() {
    let executor = SingleThreadEventExecutor::new();
    executor.execute(Box::new(|| {})).unwrap();

    let first = executor
        .shutdown_gracefully(Duration::ZERO, Duration::ZERO)
        .unwrap();
    let second = executor
        .shutdown_gracefully(Duration::from_secs(1), Duration::from_secs(2))
        .unwrap();

    first.sync().unwrap();
    assert!(second.is_done());
}

#[test]
fn test_quiet_period_accepts_late_tasks() {
    let executor = SingleThreadEventExecutor::new();
    executor.execute(Box::new(|| {})).unwrap();

    let termination = executor
        .shutdown_gracefully(Duration::from_millis(200), Duration::from_secs(5))
        .unwrap();

    let (tx, rx) = mpsc::channel();
    executor
        .execute(Box::new(move || tx.send(()).unwrap()))
        .expect("submissions are accepted during the quiet period");

    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    termination.sync().unwrap();
    assert!(executor.is_terminated());
}

#[test]
fn test_shutdown_hooks_run_on_the_worker() {
    let executor = SingleThreadEventExecutor::new();
    let (tx, rx) = mpsc::channel();

    let observer = executor.clone();
    executor.add_shutdown_hook(move || {
        tx.send(observer.in_event_loop()).unwrap();
    });

    shutdown_now(&executor);
    assert!(rx.try_recv().unwrap());
}

#[test]
fn test_await_termination_from_worker_is_refused() {
    let executor = SingleThreadEventExecutor::new();
    let inner = executor.clone();

    let result = executor
        .submit(move || inner.await_termination(Duration::from_millis(1)))
        .unwrap()
        .get()
        .unwrap();

    assert!(matches!(result, Err(Error::IllegalState(_))));
    assert!(!executor.await_termination(Duration::from_millis(10)).unwrap());

    shutdown_now(&executor);
}

#[test]
fn test_bounded_queue_rejects_overflow() {
    let executor = SingleThreadEventExecutor::builder()
        .max_pending_tasks(2)
        .build();

    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();

    executor
        .execute(Box::new(move || {
            started_tx.send(()).unwrap();
            gate_rx.recv_timeout(Duration::from_secs(5)).ok();
        }))
        .unwrap();
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    executor.execute(Box::new(|| {})).unwrap();
    executor.execute(Box::new(|| {})).unwrap();
    assert_eq!(executor.pending_tasks(), 2);

    let overflow = executor.execute(Box::new(|| {}));
    assert!(matches!(overflow, Err(Error::Rejected(_))));

    gate_tx.send(()).unwrap();
    shutdown_now(&executor);
}

#[test]
fn test_task_rejected_by_failed_spawn_never_runs() {
    let executor = SingleThreadEventExecutor::builder()
        .thread_factory(Arc::new(FlakyThreadFactory {
            failed: AtomicBool::new(false),
            inner: DefaultThreadFactory::new("flaky"),
        }))
        .build();

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();
    let rejected = executor.execute(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    assert!(matches!(rejected, Err(Error::Rejected(_))));
    assert_eq!(executor.pending_tasks(), 0);

    // The retry starts a worker, which must skip the rejected task.
    executor.submit(|| ()).unwrap().sync().unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    shutdown_now(&executor);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn test_idle_worker_suspends_and_restarts() {
    let executor = SingleThreadEventExecutor::builder()
        .thread_factory(Arc::new(DefaultThreadFactory::new("suspending")))
        .suspend_after_idle(Duration::from_millis(20))
        .build();

    let first = executor
        .submit(|| thread::current().name().map(str::to_owned))
        .unwrap()
        .get()
        .unwrap();
    assert_eq!(first.as_deref(), Some("suspending-1"));

    thread::sleep(Duration::from_millis(300));

    let second = executor
        .submit(|| thread::current().name().map(str::to_owned))
        .unwrap()
        .get()
        .unwrap();
    assert_eq!(second.as_deref(), Some("suspending-2"));

    shutdown_now(&executor);
}

#[test]
fn test_in_event_loop_is_thread_identity() {
    let executor = SingleThreadEventExecutor::new();
    assert!(!executor.in_event_loop());

    let inner = executor.clone();
    let inside = executor.submit(move || inner.in_event_loop()).unwrap();
    assert!(inside.get().unwrap());
    assert!(!executor.is_event_loop_thread(&thread::current()));

    shutdown_now(&executor);
}

#[test]
fn test_immediate_executor_runs_inline() {
    let (tx, rx) = mpsc::channel();

    ImmediateExecutor
        .execute(Box::new(move || tx.send(thread::current().id()).unwrap()))
        .unwrap();

    assert_eq!(rx.try_recv().unwrap(), thread::current().id());
    ImmediateExecutor.execute(Box::new(|| panic!("contained"))).unwrap();
}
