//! Lock-Free Ring Buffer Implementation

use crate::RingStats;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Lock-free SPSC ring buffer for raw transport bytes
///
/// `head` is written only by the producer and `tail` only by the consumer.
/// Both count bytes monotonically (wrapping), so `head - tail` is the number
/// of buffered bytes and the ring can hold all `N` of them.
///
/// `N` must be a power of two so that slot indexing stays continuous when
/// the counters wrap; other capacities fail to compile.
pub struct RingBuffer<const N: usize> {
    /// Pre-allocated storage
    storage: [AtomicU8; N],
    /// Write position (bytes ever pushed)
    head: AtomicUsize,
    /// Read position (bytes ever popped)
    tail: AtomicUsize,
    /// Bytes rejected because the ring was full
    overflows: AtomicUsize,
}

impl<const N: usize> RingBuffer<N> {
    const VALID_CAPACITY: () = assert!(
        N.is_power_of_two(),
        "ring buffer capacity must be a non-zero power of two"
    );

    /// Create an empty ring buffer
    ///
    /// `const` so a ring can live in a `static` shared with an interrupt
    /// handler or driver task.
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_CAPACITY;
        Self {
            storage: [const { AtomicU8::new(0) }; N],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            overflows: AtomicUsize::new(0),
        }
    }

    /// Push a byte (producer side)
    ///
    /// Returns `false` and counts an overflow if the ring is full. Buffered
    /// bytes are never overwritten; whether to retry is the caller's call.
    pub fn push(&self, byte: u8) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head.wrapping_sub(tail) >= N {
            self.overflows.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.storage[head % N].store(byte, Ordering::Relaxed);
        self.head.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    /// Push bytes in order until the ring fills up (producer side)
    ///
    /// Returns how many bytes were accepted; the rest are counted as overflow.
    pub fn push_slice(&self, bytes: &[u8]) -> usize {
        let mut accepted = 0;
        for &byte in bytes {
            if self.push(byte) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Pop the oldest byte (consumer side), `None` if empty
    pub fn pop(&self) -> Option<u8> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let byte = self.storage[tail % N].load(Ordering::Relaxed);
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(byte)
    }

    /// Get the number of bytes currently in the buffer
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail).min(N)
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if buffer is full
    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    /// Get the buffer capacity
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Get fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / N as f64
    }

    /// Bytes dropped on a full ring since construction
    pub fn overflows(&self) -> usize {
        self.overflows.load(Ordering::Relaxed)
    }

    /// Bytes accepted since construction
    pub fn total_pushed(&self) -> usize {
        self.head.load(Ordering::Relaxed)
    }

    /// Discard all unread bytes (consumer side)
    pub fn clear(&self) {
        let head = self.head.load(Ordering::Acquire);
        self.tail.store(head, Ordering::Release);
    }

    /// Snapshot of the ring counters
    pub fn stats(&self) -> RingStats {
        RingStats {
            capacity: N,
            buffered: self.len(),
            total_pushed: self.total_pushed(),
            overflows: self.overflows(),
        }
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> std::fmt::Debug for RingBuffer<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &N)
            .field("len", &self.len())
            .field("overflows", &self.overflows())
            .finish()
    }
}
