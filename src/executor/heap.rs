use std::cmp::Ordering;
use std::sync::Arc;

/// Index stored by an entry that is not in any queue.
pub(crate) const NOT_IN_QUEUE: usize = usize::MAX;

/// An element of a [`PriorityQueue`].
///
/// Entries are ordered by `(deadline, id)`, so equal deadlines come out in
/// creation order. Each entry remembers its own position in the heap, which
/// makes removal of an arbitrary entry O(log n) instead of a linear scan.
pub(crate) trait PriorityEntry {
    /// Absolute deadline in ticker nanoseconds.
    fn deadline(&self) -> u64;

    /// Tie-breaker, unique and increasing in creation order.
    fn id(&self) -> u64;

    /// Current heap position, or [`NOT_IN_QUEUE`].
    fn queue_index(&self) -> usize;

    /// Records the heap position. Only called by the owning queue.
    fn set_queue_index(&self, index: usize);
}

fn compare<E: PriorityEntry + ?Sized>(a: &E, b: &E) -> Ordering {
    a.deadline()
        .cmp(&b.deadline())
        .then_with(|| a.id().cmp(&b.id()))
}

/// Binary min-heap of scheduled entries with index-aware removal.
///
/// The queue is only touched by the executor's worker thread.
pub(crate) struct PriorityQueue<E: PriorityEntry + ?Sized> {
    heap: Vec<Arc<E>>,
}

impl<E: PriorityEntry + ?Sized> PriorityQueue<E> {
    pub(crate) fn new() -> Self {
        Self { heap: Vec::new() }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// The entry with the earliest deadline.
    pub(crate) fn peek(&self) -> Option<&Arc<E>> {
        self.heap.first()
    }

    pub(crate) fn push(&mut self, entry: Arc<E>) {
        let index = self.heap.len();
        entry.set_queue_index(index);
        self.heap.push(entry);
        self.sift_up(index);
    }

    pub(crate) fn pop(&mut self) -> Option<Arc<E>> {
        if self.heap.is_empty() {
            return None;
        }

        Some(self.remove_at(0))
    }

    /// Pops the head if its deadline is at or before `now`.
    pub(crate) fn poll_due(&mut self, now: u64) -> Option<Arc<E>> {
        match self.peek() {
            Some(head) if head.deadline() <= now => self.pop(),
            _ => None,
        }
    }

    /// Removes `entry` if it is in this queue.
    pub(crate) fn remove(&mut self, entry: &E) -> bool {
        let index = entry.queue_index();

        match self.heap.get(index) {
            Some(found) if found.id() == entry.id() => {
                self.remove_at(index);
                true
            }
            _ => false,
        }
    }

    /// Empties the queue, returning the entries in heap order.
    pub(crate) fn drain(&mut self) -> Vec<Arc<E>> {
        let entries = std::mem::take(&mut self.heap);

        for entry in &entries {
            entry.set_queue_index(NOT_IN_QUEUE);
        }

        entries
    }

    fn remove_at(&mut self, index: usize) -> Arc<E> {
        let removed = self.heap.swap_remove(index);
        removed.set_queue_index(NOT_IN_QUEUE);

        if index < self.heap.len() {
            self.heap[index].set_queue_index(index);

            // The moved element may belong above or below its new slot.
            if index > 0 && compare(&*self.heap[index], &*self.heap[(index - 1) / 2]).is_lt() {
                self.sift_up(index);
            } else {
                self.sift_down(index);
            }
        }

        removed
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;

            if compare(&*self.heap[index], &*self.heap[parent]).is_ge() {
                break;
            }

            self.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.heap.len();

        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }

            let right = left + 1;
            let child = if right < len && compare(&*self.heap[right], &*self.heap[left]).is_lt() {
                right
            } else {
                left
            };

            if compare(&*self.heap[child], &*self.heap[index]).is_ge() {
                break;
            }

            self.swap(index, child);
            index = child;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.heap[a].set_queue_index(a);
        self.heap[b].set_queue_index(b);
    }
}
