//! Idle Yield Capability
//!
//! The cooperative drain loop only needs "give up the CPU for a while" from
//! its scheduler. Injecting it keeps the pump free of any one runtime's
//! sleep primitive.

use std::future::Future;
use std::time::Duration;

/// Default idle period of the cooperative drain loop
pub const DEFAULT_IDLE: Duration = Duration::from_millis(20);

/// Bounded yield used when the ring buffer is empty
pub trait IdleYield {
    /// Suspend the calling task for a bounded time
    fn idle(&mut self) -> impl Future<Output = ()> + Send;
}

/// Sleep for a fixed period on the tokio timer
#[derive(Debug, Clone, Copy)]
pub struct SleepYield {
    period: Duration,
}

impl SleepYield {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Default for SleepYield {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE)
    }
}

impl IdleYield for SleepYield {
    async fn idle(&mut self) {
        tokio::time::sleep(self.period).await;
    }
}

/// Reschedule immediately without sleeping
#[derive(Debug, Clone, Copy, Default)]
pub struct YieldNow;

impl IdleYield for YieldNow {
    async fn idle(&mut self) {
        tokio::task::yield_now().await;
    }
}
