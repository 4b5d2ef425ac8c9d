use super::bucket::{Bucket, Node};
use super::timeout::{NO_NODE, Timeout};
use super::{TimerShared, WORKER_STATE_STARTED};
use crate::utils::Slab;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

/// Upper bound of pending timeouts moved into buckets per tick, so a burst
/// of insertions cannot stall expiry.
const MAX_TRANSFERS_PER_TICK: usize = 100_000;

/// The wheel, owned by the worker thread once started.
pub(crate) struct Wheel {
    buckets: Vec<Bucket>,
    mask: u64,
    arena: Slab<Node>,
    tick: u64,
}

impl Wheel {
    /// `ticks_per_wheel` must be a power of two.
    pub(crate) fn new(ticks_per_wheel: usize) -> Self {
        let mut buckets = Vec::with_capacity(ticks_per_wheel);
        buckets.resize_with(ticks_per_wheel, Bucket::default);

        Self {
            buckets,
            mask: ticks_per_wheel as u64 - 1,
            arena: Slab::with_capacity(ticks_per_wheel),
            tick: 0,
        }
    }

    fn remove(&mut self, timeout: &Timeout) {
        let node = timeout.node();
        if node == NO_NODE {
            return;
        }

        let Some(bucket) = self.arena.get(node).map(|n| n.bucket) else {
            return;
        };

        self.buckets[bucket].remove(&mut self.arena, node);
    }

    /// Links `timeout` into the slot of its deadline.
    ///
    /// Deadlines already in the past go into the current slot so they fire
    /// on this tick instead of a whole revolution later.
    fn insert(&mut self, timeout: Timeout, tick_duration: u64) {
        let calculated = timeout.deadline() / tick_duration;
        let remaining_rounds = calculated.saturating_sub(self.tick) / self.buckets.len() as u64;

        let ticks = calculated.max(self.tick);
        let index = (ticks & self.mask) as usize;

        self.buckets[index].add(&mut self.arena, index, timeout, remaining_rounds);
    }
}

/// Entry point of the timer worker thread.
pub(crate) fn run(shared: Arc<TimerShared>, mut wheel: Wheel) {
    *shared.worker_thread.lock() = Some(thread::current());

    let start_time = shared.ticker.nano_time();
    *shared.start_time.lock() = Some(start_time);
    shared.start_time_initialized.notify_all();

    tracing::debug!(
        tick_duration = shared.tick_duration,
        ticks_per_wheel = wheel.buckets.len(),
        "hashed wheel timer worker started"
    );

    loop {
        let Some(deadline) = wait_for_next_tick(&shared, wheel.tick, start_time) else {
            break;
        };

        let index = (wheel.tick & wheel.mask) as usize;

        process_cancelled_tasks(&shared, &mut wheel);
        transfer_timeouts_to_buckets(&shared, &mut wheel);

        let expired = wheel.buckets[index].expire_timeouts(&mut wheel.arena, deadline);
        tracing::trace!(tick = wheel.tick, expired = expired.len(), "timer tick");

        for timeout in expired {
            timeout.expire(&shared);
        }

        wheel.tick += 1;

        if shared.worker_state.load(Ordering::Acquire) != WORKER_STATE_STARTED {
            break;
        }
    }

    let mut unprocessed = Vec::new();
    for bucket in &mut wheel.buckets {
        bucket.clear_timeouts(&mut wheel.arena, &mut unprocessed);
    }

    while let Some(timeout) = shared.timeouts.pop() {
        if !timeout.is_cancelled() {
            unprocessed.push(timeout);
        }
    }

    process_cancelled_tasks(&shared, &mut wheel);
    *shared.unprocessed_timeouts.lock() = unprocessed;

    tracing::debug!("hashed wheel timer worker stopped");
}

/// Sleeps until the end of the current tick.
///
/// The target is absolute, `tick_duration * (tick + 1)` after start, so
/// oversleeping one tick shortens the next sleep instead of adding up.
/// Returns the elapsed time since start, or `None` once stopped.
fn wait_for_next_tick(shared: &TimerShared, tick: u64, start_time: u64) -> Option<u64> {
    let deadline = shared.tick_duration.saturating_mul(tick + 1);

    loop {
        let current = shared.ticker.nano_time().saturating_sub(start_time);

        if current >= deadline {
            return Some(current);
        }

        if shared.worker_state.load(Ordering::Acquire) != WORKER_STATE_STARTED {
            return None;
        }

        shared.ticker.sleep(Duration::from_nanos(deadline - current));
    }
}

fn process_cancelled_tasks(shared: &TimerShared, wheel: &mut Wheel) {
    while let Some(timeout) = shared.cancelled_timeouts.pop() {
        wheel.remove(&timeout);
    }
}

fn transfer_timeouts_to_buckets(shared: &TimerShared, wheel: &mut Wheel) {
    for _ in 0..MAX_TRANSFERS_PER_TICK {
        let Some(timeout) = shared.timeouts.pop() else {
            break;
        };

        if timeout.is_cancelled() {
            continue;
        }

        wheel.insert(timeout, shared.tick_duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Weak;

    fn timeout(deadline: u64) -> Timeout {
        Timeout::new(deadline, Box::new(|_| {}), Weak::new())
    }

    #[test]
    fn insert_hashes_by_deadline_and_counts_rounds() {
        let mut wheel = Wheel::new(8);

        let near = timeout(3 * 10);
        let far = timeout(19 * 10);
        wheel.insert(near.clone(), 10);
        wheel.insert(far.clone(), 10);

        let near_node = wheel.arena.get(near.node()).unwrap();
        assert_eq!(near_node.bucket, 3);

        // Tick 19 is slot 3 of the third revolution.
        let far_node = wheel.arena.get(far.node()).unwrap();
        assert_eq!(far_node.bucket, 3);

        let expired = wheel.buckets[3].expire_timeouts(&mut wheel.arena, 30);
        assert_eq!(expired, vec![near]);
    }

    #[test]
    fn past_deadline_lands_in_current_slot() {
        let mut wheel = Wheel::new(8);
        wheel.tick = 5;

        let late = timeout(10);
        wheel.insert(late.clone(), 10);

        assert_eq!(wheel.arena.get(late.node()).unwrap().bucket, 5);
    }

    #[test]
    fn remove_unlinks_by_node_handle() {
        let mut wheel = Wheel::new(4);
        let t = timeout(10);
        wheel.insert(t.clone(), 10);

        wheel.remove(&t);
        assert_eq!(t.node(), NO_NODE);
        assert_eq!(wheel.arena.len(), 0);

        // A second removal is a no-op.
        wheel.remove(&t);
    }
}
