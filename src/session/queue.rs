use std::collections::VecDeque;

/// Bounded FIFO of bytes. Input that does not fit is dropped from the tail
/// of the incoming slice; queued bytes are never evicted.
#[derive(Debug)]
pub struct ByteQueue {
    data: VecDeque<u8>,
    capacity: usize,
    dropped_bytes_total: u64,
}

impl ByteQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
            dropped_bytes_total: 0,
        }
    }

    /// Appends as much of `bytes` as fits and returns how many were taken.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let accepted = bytes.len().min(self.remaining());
        self.data.extend(&bytes[..accepted]);
        let dropped = bytes.len() - accepted;
        if dropped > 0 {
            self.dropped_bytes_total = self.dropped_bytes_total.saturating_add(dropped as u64);
        }
        accepted
    }

    /// Removes up to `count` bytes from the front.
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.data.len());
        self.data.drain(..count);
    }

    pub fn contiguous(&mut self) -> &[u8] {
        self.data.make_contiguous()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn dropped_bytes_total(&self) -> u64 {
        self.dropped_bytes_total
    }
}
