//! Stream Tasks
//!
//! Hosts a [`Pump`] on the tokio runtime and publishes the channel table on a
//! watch channel, so readers always see the latest values without sharing
//! the decoder.

use crate::error::PumpError;
use crate::idle::IdleYield;
use crate::pump::{DrainMode, DrainReport, Pump, StreamHealth};
use frame_protocol::wire::CHANNEL_COUNT;
use ring_buffer::RingBuffer;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Channel values plus stream health at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    /// Number of drain passes published so far
    pub sequence: u64,
    pub values: [i16; CHANNEL_COUNT],
    pub health: StreamHealth,
}

impl ChannelSnapshot {
    /// Capture the current state of `pump`
    pub fn capture<const N: usize>(pump: &Pump<N>, sequence: u64) -> Self {
        Self {
            sequence,
            values: pump.table().values(),
            health: pump.health(),
        }
    }
}

/// Handle to a running stream task
///
/// Dropping the handle also stops the task.
pub struct StreamHandle<const N: usize> {
    name: String,
    ring: Arc<RingBuffer<N>>,
    snapshots: watch::Receiver<ChannelSnapshot>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Pump<N>>,
}

impl<const N: usize> StreamHandle<N> {
    /// Stream name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Producer side of the stream's ring buffer
    pub fn ring(&self) -> &Arc<RingBuffer<N>> {
        &self.ring
    }

    /// Push one transport byte, `false` if the ring was full
    pub fn push(&self, byte: u8) -> bool {
        self.ring.push(byte)
    }

    /// Push transport bytes, returning how many were accepted
    pub fn push_slice(&self, bytes: &[u8]) -> usize {
        self.ring.push_slice(bytes)
    }

    /// Receiver for published snapshots
    pub fn subscribe(&self) -> watch::Receiver<ChannelSnapshot> {
        self.snapshots.clone()
    }

    /// Most recently published snapshot
    pub fn latest(&self) -> ChannelSnapshot {
        *self.snapshots.borrow()
    }

    /// Whether the task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task and hand back its pump
    ///
    /// Any partially received frame is discarded; the table keeps the last
    /// complete values.
    pub async fn stop(self) -> Result<Pump<N>, PumpError> {
        info!("Stopping stream '{}'", self.name);
        let _ = self.shutdown.send(true);
        Ok(self.task.await?)
    }
}

/// Run a cooperative `pump` as its own task
///
/// While the ring is empty the task sleeps for the pump's own idle period.
/// A `NonBlocking` pump is rejected.
pub fn spawn_cooperative<const N: usize>(pump: Pump<N>) -> Result<StreamHandle<N>, PumpError> {
    let Some(idle) = pump.idle_yield() else {
        return Err(mode_mismatch(&pump, "cooperative task"));
    };
    spawn_cooperative_with(pump, idle)
}

/// Run a cooperative `pump` as its own task, yielding through `idle`
///
/// `idle` replaces the sleep derived from the pump's idle period, e.g. to
/// hand control to another scheduler. A `NonBlocking` pump is rejected.
pub fn spawn_cooperative_with<const N: usize, Y>(
    mut pump: Pump<N>,
    mut idle: Y,
) -> Result<StreamHandle<N>, PumpError>
where
    Y: IdleYield + Send + 'static,
{
    if pump.mode() == DrainMode::NonBlocking {
        return Err(mode_mismatch(&pump, "cooperative task"));
    }

    let name = pump.name().to_string();
    let ring = Arc::clone(pump.ring());
    let (snapshot_tx, snapshots) = watch::channel(ChannelSnapshot::capture(&pump, 0));
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut sequence = 0u64;
        // Called only for passes that consumed bytes
        pump.run_with(&mut idle, &mut shutdown_rx, |pump, _| {
            sequence += 1;
            snapshot_tx.send_replace(ChannelSnapshot::capture(pump, sequence));
        })
        .await;
        pump
    });

    info!("Spawned cooperative stream '{}'", name);
    Ok(StreamHandle {
        name,
        ring,
        snapshots,
        shutdown,
        task,
    })
}

/// Drain a `NonBlocking` pump from a periodic outer loop every `period`
///
/// Each tick performs one non-blocking drain. A cooperative pump is
/// rejected.
pub fn spawn_polled<const N: usize>(
    mut pump: Pump<N>,
    period: Duration,
) -> Result<StreamHandle<N>, PumpError> {
    if pump.mode() != DrainMode::NonBlocking {
        return Err(mode_mismatch(&pump, "polled task"));
    }

    let name = pump.name().to_string();
    let ring = Arc::clone(pump.ring());
    let (snapshot_tx, snapshots) = watch::channel(ChannelSnapshot::capture(&pump, 0));
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sequence = 0u64;
        let mut total = DrainReport::default();

        while !*shutdown_rx.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    let report = pump.drain();
                    total += report;
                    if report.bytes > 0 {
                        sequence += 1;
                        snapshot_tx.send_replace(ChannelSnapshot::capture(&pump, sequence));
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        pump.reset();
        debug!(
            "Polled stream '{}' stopped after {} bytes, {} updates",
            pump.name(),
            total.bytes,
            total.updates
        );
        pump
    });

    info!("Spawned polled stream '{}' every {:?}", name, period);
    Ok(StreamHandle {
        name,
        ring,
        snapshots,
        shutdown,
        task,
    })
}

fn mode_mismatch<const N: usize>(pump: &Pump<N>, host: &'static str) -> PumpError {
    PumpError::ModeMismatch {
        stream: pump.name().to_string(),
        host,
        mode: pump.mode(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idle::SleepYield;
    use frame_protocol::{DecodeStage, Frame, SyncPolicy};

    fn uart_pump() -> Pump<256> {
        Pump::new(
            "uart",
            Arc::new(RingBuffer::new()),
            SyncPolicy::Literal,
            DrainMode::Cooperative { idle: Duration::from_millis(20) },
        )
    }

    fn usb_pump() -> Pump<1024> {
        Pump::new(
            "usb",
            Arc::new(RingBuffer::new()),
            SyncPolicy::Literal,
            DrainMode::NonBlocking,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooperative_stream_publishes_updates() {
        let handle = spawn_cooperative(uart_pump()).unwrap();
        let mut snapshots = handle.subscribe();
        assert_eq!(handle.latest().values, [0; CHANNEL_COUNT]);

        handle.push_slice(&Frame::new(4, 250).unwrap().encode());
        snapshots.changed().await.unwrap();

        let snapshot = *snapshots.borrow();
        assert_eq!(snapshot.values[4], 250);
        assert_eq!(snapshot.health.decoder.frames_decoded, 1);
        assert!(snapshot.sequence >= 1);

        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooperative_stream_waits_while_idle() {
        let handle = spawn_cooperative(uart_pump()).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());
        assert_eq!(handle.latest().sequence, 0);

        // Bytes arriving after a long stall are still picked up
        handle.push_slice(&[0xB5, 0x0C, 0x03, 0x00]);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(handle.latest().values[12], -256);

        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_partial_frame() {
        let handle = spawn_cooperative(uart_pump()).unwrap();

        handle.push_slice(&Frame::new(1, 77).unwrap().encode());
        handle.push_slice(&[0xB5, 0x02, 0x05]);
        tokio::time::sleep(Duration::from_millis(60)).await;

        let pump = handle.stop().await.unwrap();
        assert_eq!(pump.table().get_checked(1), Some(77));
        assert_eq!(pump.table().get_checked(2), Some(0));
        assert_eq!(pump.decoder_stage(), DecodeStage::AwaitingSync);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polled_stream() {
        let handle = spawn_polled(usb_pump(), Duration::from_millis(1)).unwrap();
        let mut snapshots = handle.subscribe();

        let mut bytes = Vec::new();
        for index in 0..CHANNEL_COUNT as u8 {
            bytes.extend_from_slice(&Frame::new(index, -(index as i16)).unwrap().encode());
        }
        assert_eq!(handle.push_slice(&bytes), bytes.len());

        snapshots.changed().await.unwrap();
        let snapshot = *snapshots.borrow();
        for (index, value) in snapshot.values.iter().enumerate() {
            assert_eq!(*value, -(index as i16));
        }

        let pump = handle.stop().await.unwrap();
        assert!(pump.ring().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_task() {
        let handle = spawn_polled(usb_pump(), Duration::from_millis(1)).unwrap();
        let ring = Arc::clone(handle.ring());
        drop(handle);

        tokio::time::sleep(Duration::from_millis(10)).await;
        // Task is gone, so nothing drains the ring any more
        ring.push_slice(&[0xB5, 0x00, 0x04, 0x00]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ring.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooperative_stream_uses_pump_idle_period() {
        let pump = Pump::<256>::new(
            "uart",
            Arc::new(RingBuffer::new()),
            SyncPolicy::Literal,
            DrainMode::Cooperative { idle: Duration::from_millis(10) },
        );
        let handle = spawn_cooperative(pump).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        handle.push_slice(&Frame::new(1, 42).unwrap().encode());
        // One 10 ms idle later the frame is in; the 20 ms default would miss it
        tokio::time::sleep(Duration::from_millis(14)).await;
        assert_eq!(handle.latest().values[1], 42);

        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_injected_yield_replaces_idle_period() {
        let idle = SleepYield::new(Duration::from_secs(1));
        let handle = spawn_cooperative_with(uart_pump(), idle).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        handle.push_slice(&Frame::new(1, 42).unwrap().encode());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.latest().values[1], 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.latest().values[1], 42);

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_hosting_rejects_mismatched_mode() {
        let result = spawn_cooperative(usb_pump());
        assert!(matches!(
            result,
            Err(PumpError::ModeMismatch { mode: DrainMode::NonBlocking, .. })
        ));

        let result = spawn_cooperative_with(usb_pump(), SleepYield::default());
        assert!(matches!(result, Err(PumpError::ModeMismatch { .. })));

        let result = spawn_polled(uart_pump(), Duration::from_millis(1));
        assert!(matches!(
            result,
            Err(PumpError::ModeMismatch { mode: DrainMode::Cooperative { .. }, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_noise_only_stream_publishes_health() {
        let handle = spawn_polled(usb_pump(), Duration::from_millis(1)).unwrap();
        let mut snapshots = handle.subscribe();

        handle.push_slice(&[0x01, 0x02, 0x03, 0x04, 0x05]);
        snapshots.changed().await.unwrap();

        let snapshot = *snapshots.borrow();
        assert_eq!(snapshot.values, [0; CHANNEL_COUNT]);
        assert_eq!(snapshot.health.decoder.desync_bytes, 5);
        assert_eq!(snapshot.health.decoder.frames_decoded, 0);
        assert!(snapshot.sequence >= 1);

        handle.stop().await.unwrap();
    }
}
