//! Channel Frame Protocol
//!
//! Decodes a stream of 4-byte frames into a table of 16 signed channel
//! values, and encodes channel values back onto the wire.
//!
//! ```text
//! byte0: SYNC (0xB5)
//! byte1: channel index (0..=15)
//! byte2: value + 1024, high byte
//! byte3: value + 1024, low byte
//! ```

mod decoder;
mod error;
mod frame;
mod table;

pub use decoder::{ChannelUpdate, DecodeStage, DecoderStats, FrameDecoder, SyncPolicy};
pub use error::ProtocolError;
pub use frame::{ChannelEncoder, ChannelIndex, Frame};
pub use table::ChannelTable;

/// Wire constants
pub mod wire {
    /// Frame start marker
    pub const SYNC: u8 = 0xB5;
    /// Bytes per frame, SYNC included
    pub const FRAME_LEN: usize = 4;
    /// Bias added to a channel value on the wire
    pub const VALUE_BIAS: u16 = 1024;
    /// Number of channels in a table
    pub const CHANNEL_COUNT: usize = 16;
    /// Lower end of the nominal channel range
    pub const VALUE_MIN: i16 = -1024;
    /// Upper end of the nominal channel range
    pub const VALUE_MAX: i16 = 1023;
}
