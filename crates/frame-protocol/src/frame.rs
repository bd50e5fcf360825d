//! Frame Layout, Channel Indices and Encoding

use crate::error::ProtocolError;
use crate::wire::{CHANNEL_COUNT, FRAME_LEN, SYNC, VALUE_BIAS};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// A channel index known to be inside the table (0..=15)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ChannelIndex(u8);

impl ChannelIndex {
    /// Validate a raw index, `None` if it is outside the table
    pub const fn new(raw: u8) -> Option<Self> {
        if (raw as usize) < CHANNEL_COUNT {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Raw index byte
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Index into a channel array
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Every valid index in ascending order
    pub fn all() -> impl Iterator<Item = ChannelIndex> {
        (0..CHANNEL_COUNT as u8).map(ChannelIndex)
    }
}

impl TryFrom<u8> for ChannelIndex {
    type Error = ProtocolError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or(ProtocolError::ChannelOutOfRange { index: raw })
    }
}

impl From<ChannelIndex> for u8 {
    fn from(index: ChannelIndex) -> u8 {
        index.0
    }
}

impl std::fmt::Display for ChannelIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Remove the wire bias from a big-endian value pair
///
/// Wraps in 16 bits, so every `i16` survives an encode/decode cycle.
pub(crate) fn decode_value(high: u8, low: u8) -> i16 {
    u16::from_be_bytes([high, low]).wrapping_sub(VALUE_BIAS) as i16
}

fn encode_value(value: i16) -> [u8; 2] {
    (value as u16).wrapping_add(VALUE_BIAS).to_be_bytes()
}

/// One channel update as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Target channel
    pub index: ChannelIndex,
    /// Centered channel value
    pub value: i16,
}

impl Frame {
    /// Build a frame from a raw index
    pub fn new(index: u8, value: i16) -> Result<Self, ProtocolError> {
        Ok(Self {
            index: ChannelIndex::try_from(index)?,
            value,
        })
    }

    /// Serialize to the 4-byte wire form
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let [high, low] = encode_value(self.value);
        [SYNC, self.index.get(), high, low]
    }

    /// Parse one frame that is already aligned on its SYNC byte
    ///
    /// Bytes past the first frame are ignored. Use [`crate::FrameDecoder`]
    /// for unaligned streams.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let Some(&[sync, index, high, low]) = bytes.get(..FRAME_LEN) else {
            return Err(ProtocolError::Truncated { len: bytes.len() });
        };

        if sync != SYNC {
            return Err(ProtocolError::MissingSync { found: sync });
        }

        Ok(Self {
            index: ChannelIndex::try_from(index)?,
            value: decode_value(high, low),
        })
    }
}

/// Send-on-change encoder for the host side of the link
///
/// Remembers the last value sent per channel and only produces a frame when
/// a channel actually changes.
#[derive(Debug, Clone, Default)]
pub struct ChannelEncoder {
    last_sent: [Option<i16>; CHANNEL_COUNT],
}

impl ChannelEncoder {
    /// Create an encoder that has sent nothing yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new value, returning the frame to send if it changed
    pub fn update(&mut self, index: ChannelIndex, value: i16) -> Option<Frame> {
        let slot = &mut self.last_sent[index.as_usize()];
        if *slot == Some(value) {
            return None;
        }

        *slot = Some(value);
        trace!("Encoding {} = {}", index, value);
        Some(Frame { index, value })
    }

    /// Encode every changed channel of `values` onto `out`
    ///
    /// Returns the number of frames appended.
    pub fn update_all(&mut self, values: &[i16; CHANNEL_COUNT], out: &mut Vec<u8>) -> usize {
        let mut frames = 0;
        for index in ChannelIndex::all() {
            if let Some(frame) = self.update(index, values[index.as_usize()]) {
                out.extend_from_slice(&frame.encode());
                frames += 1;
            }
        }
        frames
    }

    /// Forget what was sent so the next update resends every channel
    pub fn force_all(&mut self) {
        self.last_sent = [None; CHANNEL_COUNT];
    }

    /// Last value sent for a channel
    pub fn last_sent(&self, index: ChannelIndex) -> Option<i16> {
        self.last_sent[index.as_usize()]
    }
}
