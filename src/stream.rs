//! Flow-controlled buffer: bounded FIFO byte store.
//!
//! One [`StreamBuffer`] sits on each side of every connection, mediating
//! between socket I/O (the pump) and application code (via
//! [`crate::events::ConnectionLink`]).  The two sides are
//! single-producer/single-consumer, so a plain mutex around a `VecDeque`
//! is sufficient; no operation ever blocks.
//!
//! Capacity is fixed at construction.  `push` accepts as many bytes as fit
//! and reports the accepted count — a short push is how the pump detects a
//! full buffer.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Bounded FIFO byte store with capacity reporting.
#[derive(Debug)]
pub struct StreamBuffer {
    capacity: usize,
    inner: Mutex<VecDeque<u8>>,
}

impl StreamBuffer {
    /// Create a buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Bytes of remaining free space.
    pub fn free(&self) -> usize {
        let q = self.inner.lock().unwrap();
        self.capacity - q.len()
    }

    /// `true` when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Append up to `data.len()` bytes, bounded by free space.
    ///
    /// Returns the number of bytes accepted; a return value smaller than
    /// `data.len()` means the buffer is full.
    pub fn push(&self, data: &[u8]) -> usize {
        let mut q = self.inner.lock().unwrap();
        let accept = data.len().min(self.capacity - q.len());
        q.extend(&data[..accept]);
        accept
    }

    /// Remove and return up to `max` bytes from the front.
    pub fn pull(&self, max: usize) -> Vec<u8> {
        let mut q = self.inner.lock().unwrap();
        let take = max.min(q.len());
        q.drain(..take).collect()
    }

    /// Discard all buffered bytes.
    pub fn zero(&self) {
        self.inner.lock().unwrap().clear();
    }
}
