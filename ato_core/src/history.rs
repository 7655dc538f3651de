//! Fixed-capacity FIFO history.

use std::collections::VecDeque;

/// Maximum readings kept per temperature sensor.
pub const SENSOR_HISTORY_CAPACITY: usize = 10_000;

/// Ring of the most recent `capacity` entries; pushing onto a full ring
/// evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append `item`, returning the evicted entry if the ring was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.buf.len() == self.capacity {
            self.buf.pop_front()
        } else {
            None
        };
        self.buf.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.buf.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.buf.back()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl<T: Clone> BoundedHistory<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.buf.iter().cloned().collect()
    }
}

impl<T> Default for BoundedHistory<T> {
    fn default() -> Self {
        Self::with_capacity(SENSOR_HISTORY_CAPACITY)
    }
}

impl<T> Extend<T> for BoundedHistory<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.push(item);
        }
    }
}
