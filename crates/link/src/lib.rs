//! Channel Link
//!
//! Starts the USB and UART input streams from configuration. The USB stream
//! is drained by a periodic poll, the UART stream by its own cooperative
//! task. Each has its own ring buffer and channel table.

mod config;

pub use config::{ConfigError, LinkConfig, LoggingConfig, StreamConfig, ENV_PREFIX};

use channel_pump::{
    feed_reader, spawn_cooperative, spawn_polled, ChannelSnapshot, DrainMode, FeedReport,
    OverflowPolicy, Pump, PumpError, StreamHandle, UART_CAPACITY, USB_CAPACITY,
};
use ring_buffer::RingBuffer;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) {
    let level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(config.target)
        .with_writer(std::io::stderr);

    let result = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.expect("Failed to set tracing subscriber");
}

/// Latest values of both streams
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LinkSnapshot {
    pub usb: ChannelSnapshot,
    pub uart: ChannelSnapshot,
}

/// Final state of both streams after shutdown
pub struct LinkReport {
    pub usb: Pump<USB_CAPACITY>,
    pub uart: Pump<UART_CAPACITY>,
}

impl LinkReport {
    /// Final values of both streams, sequenced by frames decoded
    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            usb: ChannelSnapshot::capture(&self.usb, self.usb.decoder_stats().frames_decoded),
            uart: ChannelSnapshot::capture(&self.uart, self.uart.decoder_stats().frames_decoded),
        }
    }
}

/// Both running input streams
pub struct Link {
    pub usb: StreamHandle<USB_CAPACITY>,
    pub uart: StreamHandle<UART_CAPACITY>,
}

impl Link {
    /// Spawn both streams on the current tokio runtime
    pub fn start(config: &LinkConfig) -> Result<Self, PumpError> {
        let usb_pump = Pump::new(
            config.usb.name.clone(),
            Arc::new(RingBuffer::<USB_CAPACITY>::new()),
            config.usb.sync_policy,
            DrainMode::NonBlocking,
        );
        let uart_pump = Pump::new(
            config.uart.name.clone(),
            Arc::new(RingBuffer::<UART_CAPACITY>::new()),
            config.uart.sync_policy,
            DrainMode::Cooperative {
                idle: config.uart.idle_yield(),
            },
        );

        let usb = spawn_polled(usb_pump, config.usb.poll_interval())?;
        let uart = spawn_cooperative(uart_pump)?;

        info!("Link started: '{}' polled, '{}' cooperative", usb.name(), uart.name());
        Ok(Self { usb, uart })
    }

    /// Latest published values of both streams
    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            usb: self.usb.latest(),
            uart: self.uart.latest(),
        }
    }

    /// Whether both rings have been fully drained
    pub fn is_idle(&self) -> bool {
        self.usb.ring().is_empty() && self.uart.ring().is_empty()
    }

    /// Poll every `period` until both rings are empty, at most `attempts` times
    pub async fn wait_idle(&self, period: Duration, attempts: usize) -> bool {
        for _ in 0..attempts {
            if self.is_idle() {
                return true;
            }
            tokio::time::sleep(period).await;
        }
        self.is_idle()
    }

    /// Stop both streams, discarding partial frames
    pub async fn stop(self) -> Result<LinkReport, PumpError> {
        let usb = self.usb.stop().await?;
        let uart = self.uart.stop().await?;
        info!("Link stopped");
        Ok(LinkReport { usb, uart })
    }
}

type Feeder = JoinHandle<Result<FeedReport, PumpError>>;

fn spawn_feeder<R, const N: usize>(
    reader: R,
    ring: Arc<RingBuffer<N>>,
    policy: OverflowPolicy,
) -> Feeder
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move { feed_reader(reader, &*ring, policy).await })
}

/// Wait for a feeder to reach end of input, forever if there is none
async fn feeder_done(feeder: &mut Option<Feeder>) -> Result<FeedReport, PumpError> {
    match feeder {
        Some(handle) => handle.await?,
        None => std::future::pending().await,
    }
}

/// Byte sources feeding a running [`Link`]
#[derive(Default)]
pub struct Feeders {
    uart: Option<Feeder>,
    usb: Option<Feeder>,
}

impl Feeders {
    /// Copy `reader` into the UART ring on its own task
    pub fn attach_uart<R>(&mut self, link: &Link, reader: R, policy: OverflowPolicy)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.uart = Some(spawn_feeder(reader, Arc::clone(link.uart.ring()), policy));
    }

    /// Copy `reader` into the USB ring on its own task
    pub fn attach_usb<R>(&mut self, link: &Link, reader: R, policy: OverflowPolicy)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.usb = Some(spawn_feeder(reader, Arc::clone(link.usb.ring()), policy));
    }

    /// Whether every attached source has reached end of input
    pub fn is_empty(&self) -> bool {
        self.uart.is_none() && self.usb.is_none()
    }

    /// Wait for the next source to reach end of input
    ///
    /// Returns the stream it fed and its report, or `None` once all sources
    /// have finished.
    pub async fn next_finished(
        &mut self,
    ) -> Option<(&'static str, Result<FeedReport, PumpError>)> {
        tokio::select! {
            fed = feeder_done(&mut self.uart), if self.uart.is_some() => {
                self.uart = None;
                Some(("uart", fed))
            }
            fed = feeder_done(&mut self.usb), if self.usb.is_some() => {
                self.usb = None;
                Some(("usb", fed))
            }
            else => None,
        }
    }

    /// Abort sources that have not reached end of input
    pub fn abort(self) {
        for (stream, feeder) in [("uart", self.uart), ("usb", self.usb)] {
            if let Some(handle) = feeder {
                if !handle.is_finished() {
                    warn!("Aborting {} feeder before end of input", stream);
                    handle.abort();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_protocol::Frame;
    use std::io::Cursor;

    #[tokio::test(start_paused = true)]
    async fn test_streams_are_independent() {
        let link = Link::start(&LinkConfig::default()).unwrap();

        link.usb.push_slice(&Frame::new(0, 111).unwrap().encode());
        link.uart.push_slice(&Frame::new(0, -222).unwrap().encode());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = link.snapshot();
        assert_eq!(snapshot.usb.values[0], 111);
        assert_eq!(snapshot.uart.values[0], -222);
        assert!(link.is_idle());

        let report = link.stop().await.unwrap();
        assert_eq!(report.usb.table().get_checked(0), Some(111));
        assert_eq!(report.uart.table().get_checked(0), Some(-222));
        assert_eq!(report.snapshot().uart.values[0], -222);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_policy_from_config() {
        let mut config = LinkConfig::default();
        config.uart.sync_policy = frame_protocol::SyncPolicy::Restart;
        let link = Link::start(&config).unwrap();

        link.uart.push_slice(&[0xB5, 0x03, 0xB5, 0x05, 0x04, 0x01]);
        link.usb.push_slice(&[0xB5, 0x03, 0xB5, 0x05, 0x04, 0x01]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let report = link.stop().await.unwrap();
        assert_eq!(report.uart.table().get_checked(5), Some(1));
        assert_eq!(report.uart.decoder_stats().restarts, 1);
        assert_eq!(report.usb.table().get_checked(5), Some(0));
        assert_eq!(report.usb.decoder_stats().restarts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uart_idle_period_from_config() {
        let mut config = LinkConfig::default();
        config.uart.idle_yield_ms = 500;
        let link = Link::start(&config).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        link.uart.push_slice(&Frame::new(6, 60).unwrap().encode());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(link.snapshot().uart.values[6], 0);

        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(link.snapshot().uart.values[6], 60);

        link.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_feeders_run_every_source_to_end() {
        let link = Link::start(&LinkConfig::default()).unwrap();
        let wait = OverflowPolicy::Wait { backoff: Duration::from_millis(2) };

        // Far more than the USB ring holds, behind a UART source that is empty
        let usb_bytes: Vec<u8> = (0..2000i16)
            .flat_map(|value| Frame::new(2, value).unwrap().encode())
            .collect();
        let mut feeders = Feeders::default();
        feeders.attach_uart(&link, Cursor::new(Vec::new()), wait);
        feeders.attach_usb(&link, Cursor::new(usb_bytes), wait);

        let mut finished = Vec::new();
        while let Some((stream, fed)) = feeders.next_finished().await {
            finished.push((stream, fed.unwrap()));
        }
        assert!(feeders.is_empty());
        assert_eq!(finished[0].0, "uart");
        assert_eq!(finished[1].0, "usb");
        assert_eq!(finished[1].1.accepted, 8000);
        assert_eq!(finished[1].1.dropped, 0);

        assert!(link.wait_idle(Duration::from_millis(2), 50).await);
        let report = link.stop().await.unwrap();
        assert_eq!(report.usb.table().get_checked(2), Some(1999));
        assert_eq!(report.usb.decoder_stats().frames_decoded, 2000);
        feeders.abort();
    }
}
