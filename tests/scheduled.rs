use eventide::Error;
use eventide::executor::{Executor, SingleThreadEventExecutor};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn shutdown_now(executor: &SingleThreadEventExecutor) {
    executor
        .shutdown_gracefully(Duration::ZERO, Duration::ZERO)
        .unwrap()
        .sync()
        .unwrap();
}

#[test]
fn test_schedule_runs_after_delay() {
    let executor = SingleThreadEventExecutor::new();
    let scheduled_at = Instant::now();

    let future = executor
        .schedule(move || scheduled_at.elapsed(), Duration::from_millis(50))
        .unwrap();

    assert!(future.delay() <= Duration::from_millis(50));
    let elapsed = future.get().unwrap();

    assert!(elapsed >= Duration::from_millis(50), "ran early: {elapsed:?}");
    assert_eq!(future.delay(), Duration::ZERO);

    shutdown_now(&executor);
}

#[test]
fn test_zero_delay_reports_zero_and_runs_first() {
    let executor = SingleThreadEventExecutor::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    let (gate_tx, gate_rx) = mpsc::channel::<()>();

    executor
        .execute(Box::new(move || {
            gate_rx.recv_timeout(Duration::from_secs(5)).ok();
        }))
        .unwrap();

    let later = order.clone();
    let late = executor
        .schedule(move || later.lock().unwrap().push("late"), Duration::from_millis(30))
        .unwrap();

    let sooner = order.clone();
    let now = executor
        .schedule(move || sooner.lock().unwrap().push("now"), Duration::ZERO)
        .unwrap();

    assert_eq!(now.delay(), Duration::ZERO);
    assert!(!now.is_periodic());

    gate_tx.send(()).unwrap();
    late.sync().unwrap();
    now.sync().unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["now", "late"]);
    shutdown_now(&executor);
}

#[test]
fn test_equal_deadlines_run_in_submission_order() {
    let executor = SingleThreadEventExecutor::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let inner = executor.clone();
    let recorded = order.clone();
    executor
        .submit(move || {
            for i in 0..10 {
                let recorded = recorded.clone();
                inner
                    .schedule(move || recorded.lock().unwrap().push(i), Duration::ZERO)
                    .unwrap();
            }
        })
        .unwrap()
        .sync()
        .unwrap();

    thread::sleep(Duration::from_millis(100));
    shutdown_now(&executor);

    assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
}

#[test]
fn test_cancelled_task_never_runs() {
    let executor = SingleThreadEventExecutor::new();
    let ran = Arc::new(AtomicUsize::new(0));

    let counter = ran.clone();
    let future = executor
        .schedule(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(100),
        )
        .unwrap();

    assert!(future.cancel(false));
    assert!(!future.cancel(false));
    assert!(future.is_cancelled());
    assert!(matches!(future.get(), Err(Error::Cancelled)));

    thread::sleep(Duration::from_millis(250));
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    shutdown_now(&executor);
}

#[test]
fn test_cancel_from_the_worker_removes_immediately() {
    let executor = SingleThreadEventExecutor::new();
    let inner = executor.clone();

    let cancelled = executor
        .submit(move || {
            let future = inner.schedule(|| (), Duration::from_secs(60)).unwrap();
            future.cancel(true)
        })
        .unwrap();

    assert!(cancelled.get().unwrap());
    shutdown_now(&executor);
}

#[test]
fn test_fixed_rate_runs_repeatedly_until_cancelled() {
    let executor = SingleThreadEventExecutor::new();
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = runs.clone();
    let future = executor
        .schedule_at_fixed_rate(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::ZERO,
            Duration::from_millis(10),
        )
        .unwrap();
    assert!(future.is_periodic());

    thread::sleep(Duration::from_millis(200));
    assert!(future.cancel(false));

    let observed = runs.load(Ordering::SeqCst);
    assert!(observed >= 5, "only {observed} runs in 200ms at a 10ms rate");

    thread::sleep(Duration::from_millis(50));
    let after_cancel = runs.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(runs.load(Ordering::SeqCst), after_cancel);

    shutdown_now(&executor);
}

#[test]
fn test_fixed_rate_catches_up_after_a_stall() {
    let executor = SingleThreadEventExecutor::new();
    let runs = Arc::new(Mutex::new(Vec::new()));
    let (gate_tx, gate_rx) = mpsc::channel::<()>();

    let recorded = runs.clone();
    let future = executor
        .schedule_at_fixed_rate(
            move || recorded.lock().unwrap().push(Instant::now()),
            Duration::ZERO,
            Duration::from_millis(20),
        )
        .unwrap();

    // Let the first run happen, then stall the loop for five periods.
    thread::sleep(Duration::from_millis(5));
    executor
        .execute(Box::new(move || {
            gate_rx.recv_timeout(Duration::from_secs(5)).ok();
        }))
        .unwrap();
    thread::sleep(Duration::from_millis(100));
    let released = Instant::now();
    gate_tx.send(()).unwrap();

    thread::sleep(Duration::from_millis(30));
    future.cancel(false);
    shutdown_now(&executor);

    let runs = runs.lock().unwrap();
    let burst = runs.iter().filter(|t| **t >= released).count();
    assert!(
        burst >= 3,
        "missed periods must be caught up back to back, got {burst} runs"
    );
}

#[test]
fn test_fixed_delay_spaces_runs_from_completion() {
    let executor = SingleThreadEventExecutor::new();
    let runs = Arc::new(Mutex::new(Vec::new()));

    let recorded = runs.clone();
    let future = executor
        .schedule_with_fixed_delay(
            move || {
                recorded.lock().unwrap().push(Instant::now());
                thread::sleep(Duration::from_millis(10));
            },
            Duration::ZERO,
            Duration::from_millis(20),
        )
        .unwrap();

    thread::sleep(Duration::from_millis(200));
    future.cancel(false);
    shutdown_now(&executor);

    let runs = runs.lock().unwrap();
    assert!(runs.len() >= 3, "only {} runs", runs.len());

    for pair in runs.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(
            gap >= Duration::from_millis(30),
            "runs must be separated by run time plus delay, got {gap:?}"
        );
    }
}

#[test]
fn test_panicking_periodic_task_fails_and_stops() {
    let executor = SingleThreadEventExecutor::new();
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = runs.clone();
    let future = executor
        .schedule_at_fixed_rate(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("periodic failure");
            },
            Duration::ZERO,
            Duration::from_millis(5),
        )
        .unwrap();

    assert!(matches!(future.get(), Err(Error::Failed(_))));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    shutdown_now(&executor);
}

#[test]
fn test_non_positive_period_is_rejected_before_queueing() {
    let executor = SingleThreadEventExecutor::new();

    let rate = executor.schedule_at_fixed_rate(|| {}, Duration::ZERO, Duration::ZERO);
    assert!(matches!(rate, Err(Error::InvalidArgument(_))));

    let delay = executor.schedule_with_fixed_delay(|| {}, Duration::ZERO, Duration::ZERO);
    assert!(matches!(delay, Err(Error::InvalidArgument(_))));

    assert_eq!(executor.pending_tasks(), 0);
    shutdown_now(&executor);
}

#[test]
fn test_shutdown_cancels_scheduled_tasks() {
    let executor = SingleThreadEventExecutor::new();

    let future = executor.schedule(|| 1u8, Duration::from_secs(60)).unwrap();
    // Make sure the task reached the heap.
    executor.submit(|| ()).unwrap().sync().unwrap();

    shutdown_now(&executor);

    assert!(future.is_cancelled());
    assert!(matches!(
        executor.schedule(|| 2u8, Duration::ZERO),
        Err(Error::Rejected(_))
    ));
}
