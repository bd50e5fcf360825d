//! Channel Pump
//!
//! Ties a byte ring buffer to a frame decoder and its channel table. A pump
//! either drains on demand (USB-style polling) or runs as its own task that
//! yields while the ring is empty (UART-style).

mod error;
mod feeder;
mod idle;
mod pump;
mod stream;

pub use error::PumpError;
pub use feeder::{feed_reader, FeedReport, OverflowPolicy};
pub use idle::{IdleYield, SleepYield, YieldNow};
pub use pump::{DrainMode, DrainReport, Pump, StreamHealth};
pub use stream::{
    spawn_cooperative, spawn_cooperative_with, spawn_polled, ChannelSnapshot, StreamHandle,
};

pub use ring_buffer::{UART_CAPACITY, USB_CAPACITY};

/// Pump for the USB input path
pub type UsbPump = Pump<USB_CAPACITY>;

/// Pump for the UART input path
pub type UartPump = Pump<UART_CAPACITY>;
