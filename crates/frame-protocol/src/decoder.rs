//! Streaming Frame Decoder
//!
//! Consumes one byte at a time and emits a [`ChannelUpdate`] whenever a
//! complete frame with a valid channel index has been assembled. Bytes seen
//! while waiting for SYNC are discarded, which is how the decoder recovers
//! alignment after corruption.

use crate::frame::{decode_value, ChannelIndex};
use crate::table::ChannelTable;
use crate::wire::SYNC;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Position inside the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DecodeStage {
    /// Scanning for the SYNC byte
    #[default]
    AwaitingSync,
    /// Next byte is the channel index
    ReadingChannel,
    /// Next byte is the value high byte
    ReadingHigh,
    /// Next byte is the value low byte
    ReadingLow,
}

/// How a SYNC byte is treated once a frame has started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// SYNC inside a frame is ordinary data
    #[default]
    Literal,
    /// SYNC inside a frame abandons it and starts a new one
    ///
    /// Values whose high or low byte is 0xB5 can no longer be received.
    Restart,
}

/// A decoded channel write, produced only by [`FrameDecoder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelUpdate {
    index: ChannelIndex,
    value: i16,
}

impl ChannelUpdate {
    /// Target channel
    pub fn index(&self) -> ChannelIndex {
        self.index
    }

    /// Decoded value
    pub fn value(&self) -> i16 {
        self.value
    }
}

/// Decoder counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecoderStats {
    /// Bytes consumed
    pub bytes: u64,
    /// Frames that produced a channel update
    pub frames_decoded: u64,
    /// Complete frames dropped for an invalid channel index
    pub out_of_range: u64,
    /// Bytes discarded while scanning for SYNC
    pub desync_bytes: u64,
    /// Frames abandoned by an in-frame SYNC (restart policy only)
    pub restarts: u64,
}

impl DecoderStats {
    /// Share of consumed bytes that were discarded while unsynchronized
    pub fn desync_ratio(&self) -> f64 {
        if self.bytes == 0 {
            0.0
        } else {
            self.desync_bytes as f64 / self.bytes as f64
        }
    }
}

/// Byte-at-a-time frame decoder state machine
#[derive(Debug, Clone, Default)]
pub struct FrameDecoder {
    stage: DecodeStage,
    /// Channel byte in bits 16..24, high byte in 8..16, low byte in 0..8
    accumulator: u32,
    policy: SyncPolicy,
    stats: DecoderStats,
}

impl FrameDecoder {
    /// Create a decoder with the literal SYNC policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder with the given SYNC policy
    pub fn with_policy(policy: SyncPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Advance by one byte
    pub fn step(&mut self, byte: u8) -> Option<ChannelUpdate> {
        self.stats.bytes += 1;

        match self.stage {
            DecodeStage::AwaitingSync => {
                if byte == SYNC {
                    self.start_frame();
                } else {
                    self.stats.desync_bytes += 1;
                }
                None
            }
            _ if byte == SYNC && self.policy == SyncPolicy::Restart => {
                trace!("SYNC in {:?}, restarting frame", self.stage);
                self.stats.restarts += 1;
                self.start_frame();
                None
            }
            DecodeStage::ReadingChannel => {
                self.accumulator |= u32::from(byte) << 16;
                self.stage = DecodeStage::ReadingHigh;
                None
            }
            DecodeStage::ReadingHigh => {
                self.accumulator |= u32::from(byte) << 8;
                self.stage = DecodeStage::ReadingLow;
                None
            }
            DecodeStage::ReadingLow => {
                self.accumulator |= u32::from(byte);
                self.finish_frame()
            }
        }
    }

    /// Advance by one byte and apply any completed update to `table`
    pub fn feed(&mut self, byte: u8, table: &mut ChannelTable) -> Option<ChannelUpdate> {
        let update = self.step(byte)?;
        table.apply(update);
        Some(update)
    }

    /// Feed a chunk of bytes, returning the number of updates applied
    pub fn feed_slice(&mut self, bytes: &[u8], table: &mut ChannelTable) -> usize {
        bytes
            .iter()
            .filter(|&&byte| self.feed(byte, table).is_some())
            .count()
    }

    /// Drop any partial frame and wait for the next SYNC
    pub fn reset(&mut self) {
        if self.stage != DecodeStage::AwaitingSync {
            debug!("Discarding partial frame in {:?}", self.stage);
        }
        self.stage = DecodeStage::AwaitingSync;
        self.accumulator = 0;
    }

    /// Current position inside the frame
    pub fn stage(&self) -> DecodeStage {
        self.stage
    }

    /// SYNC policy in effect
    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    /// Counters since construction
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    fn start_frame(&mut self) {
        self.accumulator = 0;
        self.stage = DecodeStage::ReadingChannel;
    }

    fn finish_frame(&mut self) -> Option<ChannelUpdate> {
        let [_, channel, high, low] = self.accumulator.to_be_bytes();
        self.accumulator = 0;
        self.stage = DecodeStage::AwaitingSync;

        match ChannelIndex::new(channel) {
            Some(index) => {
                self.stats.frames_decoded += 1;
                Some(ChannelUpdate {
                    index,
                    value: decode_value(high, low),
                })
            }
            None => {
                self.stats.out_of_range += 1;
                debug!("Dropping frame for out-of-range channel {}", channel);
                None
            }
        }
    }
}
