//! Lock-Free Byte Ring Buffer
//!
//! Fixed-capacity single-producer/single-consumer queue of raw bytes that sits
//! between a transport driver (producer) and the frame decoder (consumer).

mod buffer;

pub use buffer::RingBuffer;

use serde::Serialize;

/// Ring capacity used by the UART input path
pub const UART_CAPACITY: usize = 256;

/// Ring capacity used by the USB input path
pub const USB_CAPACITY: usize = 1024;

/// Point-in-time counters for one ring buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RingStats {
    /// Fixed capacity in bytes
    pub capacity: usize,
    /// Bytes currently waiting to be popped
    pub buffered: usize,
    /// Bytes accepted by `push` since construction
    pub total_pushed: usize,
    /// Bytes dropped because the ring was full
    pub overflows: usize,
}
