//! HTTP/2 SETTINGS parameters (RFC 7540 Section 6.5.1).

use crate::error::{ErrorCode, H2Error};
use crate::frame::{DEFAULT_MAX_FRAME_SIZE, MAX_FRAME_SIZE_LIMIT};

/// HTTP/2 settings identifiers
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

/// Largest legal SETTINGS_INITIAL_WINDOW_SIZE (2^31 - 1).
pub const MAX_INITIAL_WINDOW_SIZE: u32 = 0x7FFF_FFFF;

/// One endpoint's SETTINGS. Starts at the RFC initial values and changes
/// only through [`Settings::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1). Default 4096.
    pub header_table_size: u32,
    /// SETTINGS_ENABLE_PUSH (0x2). Default enabled.
    pub enable_push: bool,
    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3). Default unlimited.
    pub max_concurrent_streams: Option<u32>,
    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4). Default 65535.
    pub initial_window_size: u32,
    /// SETTINGS_MAX_FRAME_SIZE (0x5). Default 16384.
    pub max_frame_size: u32,
    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6). Default unlimited.
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: 65535,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Entries for a SETTINGS frame, in identifier order. Unlimited values
    /// are left out.
    pub fn to_entries(&self) -> Vec<(u16, u32)> {
        let mut entries = vec![
            (settings_id::HEADER_TABLE_SIZE, self.header_table_size),
            (settings_id::ENABLE_PUSH, u32::from(self.enable_push)),
        ];
        if let Some(v) = self.max_concurrent_streams {
            entries.push((settings_id::MAX_CONCURRENT_STREAMS, v));
        }
        entries.push((settings_id::INITIAL_WINDOW_SIZE, self.initial_window_size));
        entries.push((settings_id::MAX_FRAME_SIZE, self.max_frame_size));
        if let Some(v) = self.max_header_list_size {
            entries.push((settings_id::MAX_HEADER_LIST_SIZE, v));
        }
        entries
    }

    /// Apply the entries of a received SETTINGS frame in order.
    ///
    /// Every entry is validated before any is applied, so a rejected frame
    /// leaves the settings untouched. Unknown identifiers are ignored
    /// (RFC 7540 Section 6.5.2).
    pub fn apply(&mut self, entries: &[(u16, u32)]) -> Result<(), H2Error> {
        let mut next = self.clone();
        for &(id, value) in entries {
            match id {
                settings_id::HEADER_TABLE_SIZE => next.header_table_size = value,
                settings_id::ENABLE_PUSH => {
                    if value > 1 {
                        return Err(H2Error::connection(
                            ErrorCode::ProtocolError,
                            format!("ENABLE_PUSH must be 0 or 1, got {value}"),
                        ));
                    }
                    next.enable_push = value == 1;
                }
                settings_id::MAX_CONCURRENT_STREAMS => next.max_concurrent_streams = Some(value),
                settings_id::INITIAL_WINDOW_SIZE => {
                    if value > MAX_INITIAL_WINDOW_SIZE {
                        return Err(H2Error::connection(
                            ErrorCode::FlowControlError,
                            format!("INITIAL_WINDOW_SIZE {value} above 2^31-1"),
                        ));
                    }
                    next.initial_window_size = value;
                }
                settings_id::MAX_FRAME_SIZE => {
                    if !(DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE_LIMIT).contains(&value) {
                        return Err(H2Error::connection(
                            ErrorCode::ProtocolError,
                            format!("MAX_FRAME_SIZE {value} out of range"),
                        ));
                    }
                    next.max_frame_size = value;
                }
                settings_id::MAX_HEADER_LIST_SIZE => next.max_header_list_size = Some(value),
                _ => {}
            }
        }
        *self = next;
        Ok(())
    }
}
