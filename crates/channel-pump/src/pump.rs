//! Pump Implementation

use crate::idle::{IdleYield, SleepYield};
use frame_protocol::{ChannelTable, DecodeStage, DecoderStats, FrameDecoder, SyncPolicy};
use metrics::Counter;
use ring_buffer::{RingBuffer, RingStats};
use serde::Serialize;
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// How a pump is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// Drained by an outer loop, returns as soon as the ring is empty
    NonBlocking,
    /// Runs as its own task, yielding for `idle` while the ring is empty
    Cooperative { idle: Duration },
}

/// Work done by one or more drain passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Bytes popped from the ring
    pub bytes: usize,
    /// Channel updates applied to the table
    pub updates: usize,
}

impl AddAssign for DrainReport {
    fn add_assign(&mut self, other: Self) {
        self.bytes += other.bytes;
        self.updates += other.updates;
    }
}

/// Health signals for one stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StreamHealth {
    pub decoder: DecoderStats,
    pub ring: RingStats,
    /// Share of bytes discarded while unsynchronized
    pub desync_ratio: f64,
}

/// Metric handles registered once per pump
struct PumpMetrics {
    bytes: Counter,
    frames: Counter,
    out_of_range: Counter,
    desync_bytes: Counter,
    overflows: Counter,
    reported: DecoderStats,
    reported_overflows: usize,
}

impl PumpMetrics {
    fn new(stream: &str) -> Self {
        Self {
            bytes: metrics::counter!("channel_link_bytes_total", "stream" => stream.to_string()),
            frames: metrics::counter!("channel_link_frames_total", "stream" => stream.to_string()),
            out_of_range: metrics::counter!(
                "channel_link_out_of_range_total",
                "stream" => stream.to_string()
            ),
            desync_bytes: metrics::counter!(
                "channel_link_desync_bytes_total",
                "stream" => stream.to_string()
            ),
            overflows: metrics::counter!("channel_link_overflow_total", "stream" => stream.to_string()),
            reported: DecoderStats::default(),
            reported_overflows: 0,
        }
    }

    fn record(&mut self, stats: DecoderStats, overflows: usize) {
        self.bytes.increment(stats.bytes - self.reported.bytes);
        self.frames
            .increment(stats.frames_decoded - self.reported.frames_decoded);
        self.out_of_range
            .increment(stats.out_of_range - self.reported.out_of_range);
        self.desync_bytes
            .increment(stats.desync_bytes - self.reported.desync_bytes);
        self.overflows
            .increment((overflows - self.reported_overflows) as u64);

        self.reported = stats;
        self.reported_overflows = overflows;
    }
}

/// Consumer side of one input stream
///
/// Owns the decoder and channel table outright; the ring buffer is the only
/// state shared with the producer.
pub struct Pump<const N: usize> {
    name: String,
    ring: Arc<RingBuffer<N>>,
    decoder: FrameDecoder,
    table: ChannelTable,
    mode: DrainMode,
    metrics: PumpMetrics,
}

impl<const N: usize> Pump<N> {
    /// Create a pump draining `ring`
    pub fn new(
        name: impl Into<String>,
        ring: Arc<RingBuffer<N>>,
        policy: SyncPolicy,
        mode: DrainMode,
    ) -> Self {
        let name = name.into();
        info!(
            "Creating pump '{}' ({} byte ring, {:?}, {:?})",
            name, N, policy, mode
        );

        Self {
            metrics: PumpMetrics::new(&name),
            name,
            ring,
            decoder: FrameDecoder::with_policy(policy),
            table: ChannelTable::new(),
            mode,
        }
    }

    /// Pop and decode until the ring is empty, never waits
    pub fn drain(&mut self) -> DrainReport {
        let mut report = DrainReport::default();

        while let Some(byte) = self.ring.pop() {
            report.bytes += 1;
            if self.decoder.feed(byte, &mut self.table).is_some() {
                report.updates += 1;
            }
        }

        if report.bytes > 0 {
            self.metrics
                .record(self.decoder.stats(), self.ring.overflows());
        }
        report
    }

    /// Cooperative drain loop
    ///
    /// Drains, then awaits `idle` while the ring is empty, until `shutdown`
    /// turns true or its sender is dropped.
    pub async fn run<Y: IdleYield>(
        &mut self,
        idle: &mut Y,
        shutdown: &mut watch::Receiver<bool>,
    ) -> DrainReport {
        self.run_with(idle, shutdown, |_, _| {}).await
    }

    /// Cooperative drain loop calling `on_drain` after every pass that
    /// consumed bytes
    pub async fn run_with<Y, F>(
        &mut self,
        idle: &mut Y,
        shutdown: &mut watch::Receiver<bool>,
        mut on_drain: F,
    ) -> DrainReport
    where
        Y: IdleYield,
        F: FnMut(&Self, DrainReport),
    {
        info!("Starting drain loop for '{}'", self.name);
        let mut total = DrainReport::default();

        while !*shutdown.borrow() {
            let report = self.drain();
            if report.bytes > 0 {
                total += report;
                on_drain(&*self, report);
            }

            tokio::select! {
                _ = idle.idle() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.reset();
        info!(
            "Drain loop for '{}' stopped after {} bytes, {} updates",
            self.name, total.bytes, total.updates
        );
        total
    }

    /// Discard any partially assembled frame
    ///
    /// The channel table keeps its last values.
    pub fn reset(&mut self) {
        debug!("Resetting decoder for '{}'", self.name);
        self.decoder.reset();
    }

    /// Stream name used in logs and metric labels
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How this pump expects to be driven
    pub fn mode(&self) -> DrainMode {
        self.mode
    }

    /// Idle yield for the cooperative loop, `None` for a polled pump
    pub fn idle_yield(&self) -> Option<SleepYield> {
        match self.mode {
            DrainMode::NonBlocking => None,
            DrainMode::Cooperative { idle } => Some(SleepYield::new(idle)),
        }
    }

    /// Producer side of the ring buffer
    pub fn ring(&self) -> &Arc<RingBuffer<N>> {
        &self.ring
    }

    /// Decoded channel values
    pub fn table(&self) -> &ChannelTable {
        &self.table
    }

    /// Position of the decoder inside the current frame
    pub fn decoder_stage(&self) -> DecodeStage {
        self.decoder.stage()
    }

    pub fn decoder_stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    pub fn ring_stats(&self) -> RingStats {
        self.ring.stats()
    }

    /// Decoder and ring counters together
    pub fn health(&self) -> StreamHealth {
        let decoder = self.decoder.stats();
        StreamHealth {
            decoder,
            ring: self.ring.stats(),
            desync_ratio: decoder.desync_ratio(),
        }
    }
}
