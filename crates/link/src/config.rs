//! Link configuration

use channel_pump::OverflowPolicy;
use frame_protocol::SyncPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Environment variable prefix, e.g. `CHANNEL_LINK__UART__IDLE_YIELD_MS=10`
pub const ENV_PREFIX: &str = "CHANNEL_LINK";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File or environment could not be read or parsed
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// Values parsed but are unusable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Maximum level (trace, debug, info, warn, error)
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Include the module target in each line
    pub target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            target: true,
        }
    }
}

/// Per-stream configuration
///
/// The USB stream is polled and reads `poll_interval_ms`; the UART stream
/// runs cooperatively and reads `idle_yield_ms`. `backoff_ms` applies to the
/// feeder of either stream when `wait_on_full` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Name used in logs and metric labels
    pub name: String,
    /// Treatment of SYNC bytes inside a frame
    pub sync_policy: SyncPolicy,
    /// Outer poll period of a polled stream (milliseconds)
    pub poll_interval_ms: u64,
    /// Idle yield of a cooperative stream's drain loop (milliseconds)
    pub idle_yield_ms: u64,
    /// Block the producer on a full ring instead of dropping bytes
    pub wait_on_full: bool,
    /// Feeder retry period while the ring is full (milliseconds)
    pub backoff_ms: u64,
    /// Optional byte source (file or FIFO) feeding this stream
    pub source: Option<PathBuf>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::uart()
    }
}

impl StreamConfig {
    /// USB path: polled every millisecond by the outer loop
    pub fn usb() -> Self {
        Self {
            name: "usb".to_string(),
            sync_policy: SyncPolicy::Literal,
            poll_interval_ms: 1,
            idle_yield_ms: 20,
            wait_on_full: false,
            backoff_ms: 5,
            source: None,
        }
    }

    /// UART path: own task, 20 ms idle yield
    pub fn uart() -> Self {
        Self {
            name: "uart".to_string(),
            sync_policy: SyncPolicy::Literal,
            poll_interval_ms: 1,
            idle_yield_ms: 20,
            wait_on_full: false,
            backoff_ms: 5,
            source: None,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_yield(&self) -> Duration {
        Duration::from_millis(self.idle_yield_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// What the feeder does when this stream's ring is full
    pub fn overflow_policy(&self) -> OverflowPolicy {
        if self.wait_on_full {
            OverflowPolicy::Wait {
                backoff: self.backoff(),
            }
        } else {
            OverflowPolicy::Drop
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("stream name must not be empty".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}: poll_interval_ms must be at least 1",
                self.name
            )));
        }
        if self.idle_yield_ms == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}: idle_yield_ms must be at least 1",
                self.name
            )));
        }
        if self.wait_on_full && self.backoff_ms == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}: backoff_ms must be at least 1 when wait_on_full is set",
                self.name
            )));
        }
        Ok(())
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub logging: LoggingConfig,
    pub usb: StreamConfig,
    pub uart: StreamConfig,
    /// How often the binary prints channel snapshots (milliseconds)
    pub snapshot_interval_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            usb: StreamConfig::usb(),
            uart: StreamConfig::uart(),
            snapshot_interval_ms: 500,
        }
    }
}

impl LinkConfig {
    /// Load defaults, then `path` if given, then `CHANNEL_LINK__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&LinkConfig::default())?);

        if let Some(path) = path {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path));
        }

        let loaded: LinkConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.usb.validate()?;
        self.uart.validate()?;

        if self.usb.name == self.uart.name {
            return Err(ConfigError::Invalid(format!(
                "stream names must differ, both are '{}'",
                self.usb.name
            )));
        }
        if self.snapshot_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "snapshot_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }
}
