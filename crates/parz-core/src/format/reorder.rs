use std::collections::BTreeMap;

use crate::{ParzError, Result};

/// A buffer that reorders items submitted out-of-order into a sequential stream.
///
/// Items are stored in a `BTreeMap` until the next expected index arrives, at
/// which point all contiguous items starting from that index can be released.
/// The map never holds an index that has already been released.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next_index: u64,
    pending: BTreeMap<u64, T>,
    max_pending: Option<usize>,
    peak_pending: usize,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    /// Creates an unbounded reorder buffer.
    pub fn new() -> Self {
        Self {
            next_index: 0,
            pending: BTreeMap::new(),
            max_pending: None,
            peak_pending: 0,
        }
    }

    /// Creates a reorder buffer holding at most `max_pending` out-of-order items.
    ///
    /// The next expected index is always accepted, even when the buffer is full.
    pub fn with_limit(max_pending: usize) -> Self {
        Self {
            max_pending: Some(max_pending.max(1)),
            ..Self::new()
        }
    }

    /// Stores `item` under `index` without releasing anything.
    ///
    /// # Errors
    /// Returns an error if `index` was already released or is already pending,
    /// or if the buffer's capacity is exceeded.
    pub fn insert(&mut self, index: u64, item: T) -> Result<()> {
        if index < self.next_index {
            return Err(ParzError::InvalidBlockId {
                expected: self.next_index,
                actual: index,
            });
        }

        if self.pending.contains_key(&index) {
            return Err(ParzError::DuplicateBlock(index));
        }

        if let Some(limit) = self.max_pending {
            if index != self.next_index && self.pending.len() >= limit {
                return Err(ParzError::ReorderOverflow { limit });
            }
        }

        self.pending.insert(index, item);
        // The next expected item is released right away, so it never counts as parked.
        if index != self.next_index {
            self.peak_pending = self.peak_pending.max(self.pending.len());
        }
        Ok(())
    }

    /// Releases the next item if it is pending, advancing by exactly one index.
    pub fn pop_ready(&mut self) -> Option<T> {
        let item = self.pending.remove(&self.next_index)?;
        self.next_index += 1;
        Some(item)
    }

    /// Inserts an item and returns it plus every contiguous item after it that is ready.
    pub fn push(&mut self, index: u64, item: T) -> Result<Vec<T>> {
        self.insert(index, item)?;

        let mut ready = Vec::new();
        while let Some(item) = self.pop_ready() {
            ready.push(item);
        }
        Ok(ready)
    }

    /// Index of the last released item, `None` before the first release.
    pub fn last_combined_index(&self) -> Option<u64> {
        self.next_index.checked_sub(1)
    }

    /// Returns the next expected index.
    pub fn next_expected(&self) -> u64 {
        self.next_index
    }

    /// Returns the number of items currently pending.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Highest number of out-of-order items that were pending at the same time.
    pub fn peak_pending(&self) -> usize {
        self.peak_pending
    }

    /// Indices currently held, in ascending order.
    pub fn pending_indices(&self) -> impl Iterator<Item = u64> + '_ {
        self.pending.keys().copied()
    }

    pub fn max_pending(&self) -> Option<usize> {
        self.max_pending
    }
}
