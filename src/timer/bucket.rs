use super::timeout::{NO_NODE, Timeout};
use crate::utils::Slab;

/// A timeout linked into a wheel bucket.
///
/// Nodes live in the worker-owned arena and point at each other by handle.
pub(crate) struct Node {
    pub(crate) timeout: Timeout,

    /// Full wheel revolutions left before the timeout is due.
    remaining_rounds: u64,

    prev: Option<usize>,
    next: Option<usize>,

    /// Index of the owning bucket.
    pub(crate) bucket: usize,
}

/// Doubly linked list of the timeouts hashed to one wheel slot.
#[derive(Debug, Default)]
pub(crate) struct Bucket {
    head: Option<usize>,
    tail: Option<usize>,
}

impl Bucket {
    /// Appends `timeout` and records its node handle in it.
    pub(crate) fn add(
        &mut self,
        arena: &mut Slab<Node>,
        bucket: usize,
        timeout: Timeout,
        remaining_rounds: u64,
    ) -> usize {
        let index = arena.insert(Node {
            timeout: timeout.clone(),
            remaining_rounds,
            prev: self.tail,
            next: None,
            bucket,
        });

        match self.tail {
            Some(tail) => {
                if let Some(node) = arena.get_mut(tail) {
                    node.next = Some(index);
                }
            }
            None => self.head = Some(index),
        }

        self.tail = Some(index);
        timeout.set_node(index);
        index
    }

    /// Unlinks the node `index` and frees it.
    pub(crate) fn remove(&mut self, arena: &mut Slab<Node>, index: usize) -> Option<Timeout> {
        let node = arena.remove(index)?;

        match node.prev {
            Some(prev) => {
                if let Some(prev) = arena.get_mut(prev) {
                    prev.next = node.next;
                }
            }
            None => self.head = node.next,
        }

        match node.next {
            Some(next) => {
                if let Some(next) = arena.get_mut(next) {
                    next.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }

        node.timeout.set_node(NO_NODE);
        Some(node.timeout)
    }

    /// Processes one tick of this bucket.
    ///
    /// Due nodes are unlinked and returned in list order, cancelled nodes are
    /// unlinked and dropped, the rest lose one round. Due nodes whose
    /// deadline lies after `deadline` mean the wheel is corrupted; they are
    /// logged and left for a later tick.
    pub(crate) fn expire_timeouts(&mut self, arena: &mut Slab<Node>, deadline: u64) -> Vec<Timeout> {
        let mut expired = Vec::new();
        let mut cursor = self.head;

        while let Some(index) = cursor {
            let Some(node) = arena.get_mut(index) else {
                break;
            };
            cursor = node.next;

            if node.remaining_rounds == 0 {
                if node.timeout.deadline() > deadline {
                    tracing::error!(
                        timeout_deadline = node.timeout.deadline(),
                        tick_deadline = deadline,
                        "timeout placed into the wrong bucket"
                    );
                    continue;
                }

                if let Some(timeout) = self.remove(arena, index) {
                    expired.push(timeout);
                }
            } else if node.timeout.is_cancelled() {
                self.remove(arena, index);
            } else {
                node.remaining_rounds -= 1;
            }
        }

        expired
    }

    /// Unlinks every node, collecting timeouts that neither expired nor
    /// were cancelled.
    pub(crate) fn clear_timeouts(&mut self, arena: &mut Slab<Node>, unprocessed: &mut Vec<Timeout>) {
        while let Some(head) = self.head {
            let Some(timeout) = self.remove(arena, head) else {
                break;
            };

            if !timeout.is_expired() && !timeout.is_cancelled() {
                unprocessed.push(timeout);
            }
        }
    }

    #[cfg(test)]
    fn len(&self, arena: &Slab<Node>) -> usize {
        let mut len = 0;
        let mut cursor = self.head;

        while let Some(index) = cursor {
            len += 1;
            cursor = arena.get(index).and_then(|node| node.next);
        }

        len
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
    fn removal_relinks_neighbours() {
        let mut arena = Slab::with_capacity(4);
        let mut bucket = Bucket::default();

        let a = bucket.add(&mut arena, 0, timeout(1), 0);
        let b = bucket.add(&mut arena, 0, timeout(2), 0);
        let c = bucket.add(&mut arena, 0, timeout(3), 0);

        let removed = bucket.remove(&mut arena, b).unwrap();
        assert_eq!(removed.deadline(), 2);
        assert_eq!(removed.node(), NO_NODE);
        assert_eq!(bucket.len(&arena), 2);

        bucket.remove(&mut arena, a).unwrap();
        bucket.remove(&mut arena, c).unwrap();
        assert_eq!(bucket.len(&arena), 0);
        assert!(bucket.head.is_none() && bucket.tail.is_none());
        assert_eq!(arena.len(), 0);
    }

    #[test]
    fn expire_fires_due_nodes_in_order_and_decrements_rounds() {
        let mut arena = Slab::with_capacity(4);
        let mut bucket = Bucket::default();

        let first = timeout(10);
        let later = timeout(10 + 512);
        let second = timeout(20);

        bucket.add(&mut arena, 0, first.clone(), 0);
        bucket.add(&mut arena, 0, later.clone(), 1);
        bucket.add(&mut arena, 0, second.clone(), 0);

        let expired = bucket.expire_timeouts(&mut arena, 100);
        assert_eq!(expired, vec![first, second]);
        assert_eq!(bucket.len(&arena), 1);

        let expired = bucket.expire_timeouts(&mut arena, 100 + 512);
        assert_eq!(expired, vec![later]);
        assert_eq!(bucket.len(&arena), 0);
    }

    #[test]
    fn cancelled_nodes_are_unlinked_on_visit() {
        let mut arena = Slab::with_capacity(2);
        let mut bucket = Bucket::default();

        let cancelled = timeout(5);
        bucket.add(&mut arena, 0, cancelled.clone(), 3);
        assert!(cancelled.cancel());

        assert!(bucket.expire_timeouts(&mut arena, 0).is_empty());
        assert_eq!(bucket.len(&arena), 0);
    }

    #[test]
    fn clear_skips_cancelled_timeouts() {
        let mut arena = Slab::with_capacity(2);
        let mut bucket = Bucket::default();

        let live = timeout(1);
        let cancelled = timeout(2);
        bucket.add(&mut arena, 0, live.clone(), 0);
        bucket.add(&mut arena, 0, cancelled.clone(), 0);
        cancelled.cancel();

        let mut unprocessed = Vec::new();
        bucket.clear_timeouts(&mut arena, &mut unprocessed);

        assert_eq!(unprocessed, vec![live]);
        assert_eq!(arena.len(), 0);
    }
}
