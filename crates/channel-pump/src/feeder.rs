//! Byte Feeder
//!
//! Producer side of a stream: copies bytes from any async reader into a ring
//! buffer in whatever chunk sizes the reader delivers.

use crate::error::PumpError;
use ring_buffer::RingBuffer;
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

/// Read chunk size
const CHUNK_LEN: usize = 64;

/// What the producer does when the ring is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop the byte and count it, as an interrupt handler must
    Drop,
    /// Wait `backoff` and retry until the consumer makes room
    Wait { backoff: Duration },
}

/// Totals for one feeder run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedReport {
    /// Bytes read from the source
    pub bytes_read: u64,
    /// Bytes accepted by the ring
    pub accepted: u64,
    /// Bytes lost to a full ring
    pub dropped: u64,
}

/// Copy `reader` into `ring` until end of input
pub async fn feed_reader<R, const N: usize>(
    mut reader: R,
    ring: &RingBuffer<N>,
    policy: OverflowPolicy,
) -> Result<FeedReport, PumpError>
where
    R: AsyncRead + Unpin,
{
    let mut report = FeedReport::default();
    let mut chunk = [0u8; CHUNK_LEN];

    loop {
        let len = reader.read(&mut chunk).await?;
        if len == 0 {
            break;
        }
        report.bytes_read += len as u64;

        match policy {
            OverflowPolicy::Drop => {
                let accepted = ring.push_slice(&chunk[..len]);
                report.accepted += accepted as u64;
                if accepted < len {
                    let dropped = len - accepted;
                    report.dropped += dropped as u64;
                    warn!("Ring full, dropped {} bytes", dropped);
                }
            }
            OverflowPolicy::Wait { backoff } => {
                for &byte in &chunk[..len] {
                    while ring.is_full() {
                        tokio::time::sleep(backoff).await;
                    }
                    // Only this task pushes, so the slot seen above is still free
                    ring.push(byte);
                    report.accepted += 1;
                }
            }
        }
        debug!("Fed {} bytes", len);
    }

    info!(
        "Byte source closed: {} read, {} accepted, {} dropped",
        report.bytes_read, report.accepted, report.dropped
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pump::{DrainMode, Pump};
    use frame_protocol::{Frame, SyncPolicy};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_feed_until_eof() {
        let ring = RingBuffer::<256>::new();
        let bytes = Frame::new(6, 512).unwrap().encode();

        let report = feed_reader(&bytes[..], &ring, OverflowPolicy::Drop).await.unwrap();

        assert_eq!(report, FeedReport { bytes_read: 4, accepted: 4, dropped: 0 });
        assert_eq!(ring.len(), 4);
    }

    #[tokio::test]
    async fn test_drop_policy_counts_overflow() {
        let ring = RingBuffer::<16>::new();
        let bytes = [0x55u8; 40];

        let report = feed_reader(&bytes[..], &ring, OverflowPolicy::Drop).await.unwrap();

        assert_eq!(report.accepted, 16);
        assert_eq!(report.dropped, 24);
        assert_eq!(ring.overflows(), 24);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_policy_loses_nothing() {
        let ring = Arc::new(RingBuffer::<8>::new());
        let mut pump = Pump::new(
            "replay",
            Arc::clone(&ring),
            SyncPolicy::Literal,
            DrainMode::NonBlocking,
        );

        let mut bytes = Vec::new();
        for index in 0..16u8 {
            bytes.extend_from_slice(&Frame::new(index, index as i16 * 3).unwrap().encode());
        }

        let feeder = {
            let ring = Arc::clone(&ring);
            let bytes = bytes.clone();
            tokio::spawn(async move {
                feed_reader(
                    &bytes[..],
                    &*ring,
                    OverflowPolicy::Wait { backoff: Duration::from_millis(1) },
                )
                .await
            })
        };

        while !feeder.is_finished() {
            pump.drain();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        pump.drain();

        let report = feeder.await.unwrap().unwrap();
        assert_eq!(report.accepted, bytes.len() as u64);
        assert_eq!(report.dropped, 0);
        assert_eq!(ring.overflows(), 0);
        for (index, value) in pump.table().iter() {
            assert_eq!(value, index.get() as i16 * 3);
        }
    }
}
