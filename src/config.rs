//! Session configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! header_table_size = 4096
//! max_frame_size = 16384
//! huffman = true
//! queue_capacity = 64
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::frame::{DEFAULT_MAX_FRAME_SIZE, MAX_FRAME_SIZE_LIMIT};
use crate::h2_codec::MAX_HEADER_BLOCK_SIZE;
use crate::settings::{Settings, MAX_INITIAL_WINDOW_SIZE};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Per-connection settings and limits, loadable from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// SETTINGS_HEADER_TABLE_SIZE we advertise; bounds the peer's encoder.
    #[serde(default = "default_header_table_size")]
    pub header_table_size: u32,

    /// SETTINGS_MAX_FRAME_SIZE we advertise; larger inbound frames are refused.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: u32,

    #[serde(default)]
    pub max_concurrent_streams: Option<u32>,

    #[serde(default = "default_initial_window_size")]
    pub initial_window_size: u32,

    #[serde(default)]
    pub enable_push: bool,

    #[serde(default)]
    pub max_header_list_size: Option<u32>,

    /// Huffman-code outbound header literals.
    #[serde(default = "default_true")]
    pub huffman: bool,

    /// Capacity of the outbound frame queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Largest header block accepted across HEADERS + CONTINUATION.
    #[serde(default = "default_max_header_block_size")]
    pub max_header_block_size: usize,

    /// Enforce stream-id parity and monotonicity for new streams.
    #[serde(default = "default_true")]
    pub strict_stream_ids: bool,

    /// How long WINDOW_UPDATE is tolerated on a closed stream.
    #[serde(default = "default_closed_stream_grace_ms")]
    pub closed_stream_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            header_table_size: default_header_table_size(),
            max_frame_size: default_max_frame_size(),
            max_concurrent_streams: None,
            initial_window_size: default_initial_window_size(),
            enable_push: false,
            max_header_list_size: None,
            huffman: true,
            queue_capacity: default_queue_capacity(),
            max_header_block_size: default_max_header_block_size(),
            strict_stream_ids: true,
            closed_stream_grace_ms: default_closed_stream_grace_ms(),
        }
    }
}

fn default_header_table_size() -> u32 {
    4096
}

fn default_max_frame_size() -> u32 {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_initial_window_size() -> u32 {
    65_535
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    64
}

fn default_max_header_block_size() -> usize {
    MAX_HEADER_BLOCK_SIZE
}

fn default_closed_stream_grace_ms() -> u64 {
    1000
}

impl SessionConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE_LIMIT).contains(&self.max_frame_size) {
            return Err(ConfigError::Invalid(format!(
                "max_frame_size must be between {} and {}, got {}",
                DEFAULT_MAX_FRAME_SIZE, MAX_FRAME_SIZE_LIMIT, self.max_frame_size
            )));
        }
        if self.initial_window_size > MAX_INITIAL_WINDOW_SIZE {
            return Err(ConfigError::Invalid(format!(
                "initial_window_size must be <= {}, got {}",
                MAX_INITIAL_WINDOW_SIZE, self.initial_window_size
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be > 0".into()));
        }
        if self.max_header_block_size == 0 {
            return Err(ConfigError::Invalid(
                "max_header_block_size must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// SETTINGS this endpoint advertises.
    pub fn local_settings(&self) -> Settings {
        Settings {
            header_table_size: self.header_table_size,
            enable_push: self.enable_push,
            max_concurrent_streams: self.max_concurrent_streams,
            initial_window_size: self.initial_window_size,
            max_frame_size: self.max_frame_size,
            max_header_list_size: self.max_header_list_size,
        }
    }

    pub fn closed_stream_grace(&self) -> Duration {
        Duration::from_millis(self.closed_stream_grace_ms)
    }
}
