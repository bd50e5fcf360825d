//! Frame Protocol Error Types

use thiserror::Error;

/// Errors raised when building or parsing a single frame
///
/// The streaming decoder never returns these; it counts and resynchronizes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Channel index outside the table
    #[error("Channel index {index} out of range (0..{count})", count = crate::wire::CHANNEL_COUNT)]
    ChannelOutOfRange { index: u8 },

    /// Fewer bytes than one frame
    #[error("Truncated frame: {len} of {frame_len} bytes", frame_len = crate::wire::FRAME_LEN)]
    Truncated { len: usize },

    /// Aligned frame does not start with SYNC
    #[error("Expected SYNC {sync:02X}, found {found:02X}", sync = crate::wire::SYNC)]
    MissingSync { found: u8 },
}
