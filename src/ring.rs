//! Fixed-capacity ring buffer
//!
//! Bounded history used by the baseline tracker and the PPG extractor.
//! Capacity, write cursor and fill count are first-class state rather than
//! index arithmetic scattered through callers.

use serde::{Deserialize, Serialize};

/// Fixed-capacity circular buffer that overwrites its oldest slot when full
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    capacity: usize,
    /// Index of the slot the next write lands in
    cursor: usize,
    /// Number of slots holding data, never above `capacity`
    filled: usize,
}

impl<T: Clone + Default> RingBuffer<T> {
    /// Create an empty ring. A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![T::default(); capacity],
            capacity,
            cursor: 0,
            filled: 0,
        }
    }

    /// Write a value into the current slot and advance the cursor
    ///
    /// Returns the value that was overwritten once the ring is full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.filled == self.capacity {
            Some(std::mem::replace(&mut self.slots[self.cursor], value))
        } else {
            self.slots[self.cursor] = value;
            self.filled += 1;
            None
        };
        self.cursor = (self.cursor + 1) % self.capacity;
        evicted
    }

    /// Drop all values; capacity is kept
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = T::default());
        self.cursor = 0;
        self.filled = 0;
    }
}

impl<T> RingBuffer<T> {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Fill count
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.capacity
    }

    /// Index of the oldest filled slot
    fn head(&self) -> usize {
        if self.filled == self.capacity {
            self.cursor
        } else {
            0
        }
    }

    /// Iterate filled slots from oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        let head = self.head();
        (0..self.filled).map(move |i| &self.slots[(head + i) % self.capacity])
    }

    /// Most recently written value
    pub fn latest(&self) -> Option<&T> {
        if self.filled == 0 {
            return None;
        }
        let idx = (self.cursor + self.capacity - 1) % self.capacity;
        Some(&self.slots[idx])
    }

    /// Iterate the newest `n` values, oldest first
    pub fn newest(&self, n: usize) -> impl Iterator<Item = &T> + '_ {
        let skip = self.filled.saturating_sub(n);
        self.iter().skip(skip)
    }
}

impl RingBuffer<f64> {
    /// Arithmetic mean over the filled slots, 0.0 when empty
    pub fn mean(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        self.iter().sum::<f64>() / self.filled as f64
    }
}
