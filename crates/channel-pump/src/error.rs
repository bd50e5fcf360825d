//! Pump Error Types

use crate::pump::DrainMode;
use thiserror::Error;

/// Errors from hosting a stream or feeding it bytes
#[derive(Debug, Error)]
pub enum PumpError {
    /// The drain task panicked or was aborted
    #[error("Stream task failed: {0}")]
    TaskFailed(String),

    /// The pump's drain mode does not fit the task hosting it
    #[error("Stream '{stream}' cannot be hosted as {host}: pump is {mode:?}")]
    ModeMismatch {
        stream: String,
        host: &'static str,
        mode: DrainMode,
    },

    /// Reading from the byte source failed
    #[error("Byte source error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio::task::JoinError> for PumpError {
    fn from(err: tokio::task::JoinError) -> Self {
        PumpError::TaskFailed(err.to_string())
    }
}
