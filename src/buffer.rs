//! Bounded ring buffer
//!
//! Fixed-capacity circular buffer with index arithmetic: pushing at
//! capacity overwrites the oldest entry in O(1). Used for serial telemetry
//! so "read recent output" returns a tail without unbounded growth.

/// Fixed-capacity circular buffer
#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    /// Index of the oldest entry
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` entries (capacity >= 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append an entry, evicting the oldest when full
    pub fn push(&mut self, value: T) {
        let capacity = self.slots.len();
        if self.len < capacity {
            let tail = (self.head + self.len) % capacity;
            self.slots[tail] = Some(value);
            self.len += 1;
        } else {
            self.slots[self.head] = Some(value);
            self.head = (self.head + 1) % capacity;
        }
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let capacity = self.slots.len();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % capacity].as_ref())
    }

    /// Last `n` entries, oldest first
    pub fn tail(&self, n: usize) -> Vec<&T> {
        let skip = self.len.saturating_sub(n);
        self.iter().skip(skip).collect()
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}
