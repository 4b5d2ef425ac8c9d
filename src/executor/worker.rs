use super::context::enter_worker;
use super::core::{Shared, UNSET};
use super::state::{SHUTDOWN, SHUTTING_DOWN, STARTED, SUSPENDED, SUSPENDING, TERMINATED};
use crate::task::{Task, run_guarded};

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

/// Longest the worker parks before re-checking its state.
const MAX_IDLE_PARK: Duration = Duration::from_millis(100);

/// Entry point of the worker thread.
pub(crate) fn run(shared: Arc<Shared>) {
    enter_worker(shared.id());
    shared.set_worker_thread(Some(thread::current().id()));
    update_last_execution_time(&shared);

    tracing::debug!(executor = shared.id(), "event executor worker started");

    if run_loop(&shared) {
        tracing::debug!(executor = shared.id(), "event executor worker suspended");
        return;
    }

    terminate(&shared);
}

/// Runs tasks until shutdown is confirmed or the worker suspends.
///
/// Returns `true` if the worker suspended.
fn run_loop(shared: &Arc<Shared>) -> bool {
    loop {
        if let Some(task) = take_task(shared) {
            run_guarded(task);
            update_last_execution_time(shared);
        }

        if shared.is_shutting_down() {
            if confirm_shutdown(shared) {
                return false;
            }
            continue;
        }

        if try_suspend(shared) {
            return true;
        }
    }
}

/// Returns the next task, parking at most once while idle.
fn take_task(shared: &Arc<Shared>) -> Option<Task> {
    shared.fetch_from_scheduled_task_queue();

    if let Some(task) = shared.poll_task() {
        return Some(task);
    }

    if shared.is_shutting_down() {
        return None;
    }

    let park = idle_park(shared);
    if !park.is_zero() {
        shared.parker.park_timeout(park);
    }

    shared.fetch_from_scheduled_task_queue();
    shared.poll_task()
}

/// How long the idle worker may park: until the next scheduled deadline,
/// the suspension deadline, or [`MAX_IDLE_PARK`], whichever is first.
fn idle_park(shared: &Shared) -> Duration {
    let mut park = MAX_IDLE_PARK;

    if let Some(delay) = shared.next_scheduled_delay() {
        park = park.min(Duration::from_nanos(delay));
    }

    if let Some(idle) = shared.suspend_after_idle {
        let elapsed = shared
            .ticker
            .nano_time()
            .saturating_sub(shared.last_execution_time.load(Ordering::Acquire));
        park = park.min(Duration::from_nanos(idle.saturating_sub(elapsed)));
    }

    park
}

fn update_last_execution_time(shared: &Shared) {
    shared
        .last_execution_time
        .store(shared.ticker.nano_time(), Ordering::Release);
}

/// Exits the worker if it idled long enough with nothing queued.
///
/// Submitters racing with the decision spin while the state is
/// `SUSPENDING`, then either see `STARTED` again or start a new worker
/// once the state reached `SUSPENDED`.
fn try_suspend(shared: &Shared) -> bool {
    let Some(idle) = shared.suspend_after_idle else {
        return false;
    };

    if shared.has_tasks() || !shared.scheduled.lock().is_empty() {
        return false;
    }

    let elapsed = shared
        .ticker
        .nano_time()
        .saturating_sub(shared.last_execution_time.load(Ordering::Acquire));
    if elapsed < idle {
        return false;
    }

    if shared
        .state
        .compare_exchange(STARTED, SUSPENDING, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return false;
    }

    if shared.has_tasks() {
        let _ = shared.state.compare_exchange(
            SUSPENDING,
            STARTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        return false;
    }

    let worker = shared.worker_thread();
    shared.set_worker_thread(None);

    if shared
        .state
        .compare_exchange(SUSPENDING, SUSPENDED, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        return true;
    }

    // A shutdown request won the race; keep running to honour it.
    shared.set_worker_thread(worker);
    false
}

/// Decides whether the worker may exit during a graceful shutdown.
///
/// Cancels scheduled tasks and runs whatever is queued. The worker exits
/// once no task ran for the quiet period, once the timeout elapsed, or
/// right away once submissions are rejected.
fn confirm_shutdown(shared: &Shared) -> bool {
    if !shared.is_shutting_down() {
        return false;
    }

    shared.cancel_scheduled_tasks();

    if shared.graceful_shutdown_start.load(Ordering::Acquire) == UNSET {
        shared
            .graceful_shutdown_start
            .store(shared.ticker.nano_time(), Ordering::Release);
    }

    if run_all_tasks(shared) | run_shutdown_hooks(shared) {
        if shared.is_shutdown() {
            return true;
        }

        // Something ran: the quiet period starts over, unless there is none.
        return shared.quiet_period.load(Ordering::Acquire) == 0;
    }

    let now = shared.ticker.nano_time();
    let started = shared.graceful_shutdown_start.load(Ordering::Acquire);

    if shared.is_shutdown()
        || now.saturating_sub(started) > shared.shutdown_timeout.load(Ordering::Acquire)
    {
        return true;
    }

    let last = shared.last_execution_time.load(Ordering::Acquire);
    if now.saturating_sub(last) <= shared.quiet_period.load(Ordering::Acquire) {
        shared.parker.park_timeout(MAX_IDLE_PARK);
        return false;
    }

    true
}

fn run_all_tasks(shared: &Shared) -> bool {
    let mut ran = false;

    while let Some(task) = shared.poll_task() {
        run_guarded(task);
        ran = true;
    }

    if ran {
        update_last_execution_time(shared);
    }

    ran
}

fn run_shutdown_hooks(shared: &Shared) -> bool {
    let mut ran = false;

    loop {
        let hooks = shared.take_shutdown_hooks();
        if hooks.is_empty() {
            break;
        }

        for hook in hooks {
            run_guarded(hook);
            ran = true;
        }
    }

    if ran {
        update_last_execution_time(shared);
    }

    ran
}

/// Moves the state forward to `target` unless it is already past it.
fn advance_state(shared: &Shared, target: u8) {
    loop {
        let current = shared.load_state();

        if current >= target
            || shared
                .state
                .compare_exchange(current, target, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            return;
        }
    }
}

/// Drains the executor after the loop exited and completes termination.
fn terminate(shared: &Arc<Shared>) {
    advance_state(shared, SHUTTING_DOWN);

    while !confirm_shutdown(shared) {}

    // From here on every submission is rejected; run what slipped in before.
    advance_state(shared, SHUTDOWN);
    confirm_shutdown(shared);

    shared.state.store(TERMINATED, Ordering::Release);

    let mut dropped = 0usize;
    while shared.poll_task().is_some() {
        dropped += 1;
    }

    if dropped > 0 {
        tracing::warn!(
            executor = shared.id(),
            dropped,
            "an event executor terminated with non-empty task queue"
        );
    }

    shared.set_worker_thread(None);
    shared.termination.try_success(());

    tracing::debug!(executor = shared.id(), "event executor terminated");
}
