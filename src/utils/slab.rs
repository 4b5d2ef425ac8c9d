/// A slot in the slab.
enum Entry<T> {
    /// Holds a live value.
    Occupied(T),
    /// Free slot, linking to the next free slot.
    Vacant(Option<usize>),
}

/// A simple slab allocator.
///
/// A `Slab` stores values of type `T` in a contiguous vector and hands out
/// stable `usize` handles that are reused after removal.
///
/// Handles are plain indices. Callers that may observe a handle after its
/// value was removed must track liveness themselves (the wheel timer does
/// so by clearing the handle stored in the timeout when it unlinks a node).
pub(crate) struct Slab<T> {
    /// Storage for all slots.
    entries: Vec<Entry<T>>,
    /// Head of the intrusive free list.
    free_head: Option<usize>,
    /// Number of occupied slots.
    len: usize,
}

impl<T> Slab<T> {
    /// Creates a slab with room for `capacity` values before reallocating.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free_head: None,
            len: 0,
        }
    }

    /// Inserts a value and returns its handle.
    ///
    /// A free slot is reused when available, otherwise the slab grows.
    pub(crate) fn insert(&mut self, value: T) -> usize {
        self.len += 1;

        match self.free_head {
            Some(index) => {
                let next = match &self.entries[index] {
                    Entry::Vacant(next) => *next,
                    Entry::Occupied(_) => unreachable!("free list points at an occupied slot"),
                };
                self.free_head = next;
                self.entries[index] = Entry::Occupied(value);
                index
            }
            None => {
                self.entries.push(Entry::Occupied(value));
                self.entries.len() - 1
            }
        }
    }

    /// Removes and returns the value stored under `index`.
    ///
    /// Returns `None` if the slot is out of range or already free.
    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        let slot = self.entries.get_mut(index)?;

        if matches!(slot, Entry::Vacant(_)) {
            return None;
        }

        let taken = std::mem::replace(slot, Entry::Vacant(self.free_head));
        self.free_head = Some(index);
        self.len -= 1;

        match taken {
            Entry::Occupied(value) => Some(value),
            Entry::Vacant(_) => None,
        }
    }

    /// Returns a reference to the value under `index`, if any.
    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        match self.entries.get(index)? {
            Entry::Occupied(value) => Some(value),
            Entry::Vacant(_) => None,
        }
    }

    /// Returns a mutable reference to the value under `index`, if any.
    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        match self.entries.get_mut(index)? {
            Entry::Occupied(value) => Some(value),
            Entry::Vacant(_) => None,
        }
    }

    /// Number of live values.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}
