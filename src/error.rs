//! Error types for the frame codec, HPACK and the session.

use thiserror::Error;

/// HTTP/2 error codes (RFC 7540 Section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
}

impl ErrorCode {
    /// Map a wire value to a code. Unknown values are treated as
    /// `InternalError`, which RFC 7540 Section 7 allows.
    pub fn from_u32(v: u32) -> Self {
        match v {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            _ => Self::InternalError,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::NoError => "NO_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::FlowControlError => "FLOW_CONTROL_ERROR",
            Self::SettingsTimeout => "SETTINGS_TIMEOUT",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::FrameSizeError => "FRAME_SIZE_ERROR",
            Self::RefusedStream => "REFUSED_STREAM",
            Self::Cancel => "CANCEL",
            Self::CompressionError => "COMPRESSION_ERROR",
            Self::ConnectError => "CONNECT_ERROR",
            Self::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            Self::InadequateSecurity => "INADEQUATE_SECURITY",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// HPACK encoding and decoding failures (RFC 7541).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HpackError {
    #[error("integer prefix of {0} bits is unsupported (must be 1..=8)")]
    InvalidPrefix(u8),
    #[error("integer exceeds the representable range")]
    IntegerOverflow,
    #[error("header block truncated")]
    Truncated,
    #[error("header index {0} is out of range")]
    InvalidIndex(usize),
    #[error("Huffman code does not resolve to a symbol")]
    HuffmanDeadEnd,
    #[error("EOS symbol inside a Huffman-encoded literal")]
    HuffmanEos,
    #[error("invalid Huffman padding")]
    HuffmanPadding,
    #[error("header field is not valid UTF-8")]
    InvalidUtf8,
    #[error("dynamic table size update to {requested} exceeds the limit of {limit}")]
    TableSizeExceeded { requested: usize, limit: usize },
    #[error("dynamic table size update after the first header field")]
    LateTableSizeUpdate,
}

/// Errors produced by the frame codec, the stream state machine and the session.
#[derive(Debug, Error)]
pub enum H2Error {
    /// Connection error: answered with GOAWAY, the connection is torn down.
    #[error("connection error {code}: {reason}")]
    Connection { code: ErrorCode, reason: String },
    /// Stream error: answered with RST_STREAM, the connection survives.
    #[error("stream {stream_id} error {code}: {reason}")]
    Stream {
        stream_id: u32,
        code: ErrorCode,
        reason: String,
    },
    /// Header block could not be decoded; fatal for the connection.
    #[error("HPACK error: {0}")]
    Hpack(#[from] HpackError),
    /// Outbound frame payload larger than the permitted frame size.
    #[error("frame payload of {len} bytes exceeds the maximum frame size {max}")]
    FrameTooLarge { len: usize, max: u32 },
    /// The application tried to send a frame the stream state forbids.
    #[error("cannot send {frame_type} on stream {stream_id} in state {state:?}")]
    IllegalSend {
        stream_id: u32,
        frame_type: &'static str,
        state: crate::stream::StreamState,
    },
    /// The application built a frame that cannot be put on the wire.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("unknown frame type 0x{0:x}")]
    UnknownFrameType(u8),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session closed")]
    SessionClosed,
    /// `try_send` found the outbound queue full.
    #[error("outbound queue is full")]
    QueueFull,
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl H2Error {
    pub fn connection(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Connection {
            code,
            reason: reason.into(),
        }
    }

    pub fn stream(stream_id: u32, code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Stream {
            stream_id,
            code,
            reason: reason.into(),
        }
    }

    /// Wire error code to report to the peer for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Connection { code, .. } | Self::Stream { code, .. } => *code,
            Self::Hpack(_) => ErrorCode::CompressionError,
            Self::FrameTooLarge { .. } => ErrorCode::FrameSizeError,
            Self::UnknownFrameType(_) => ErrorCode::ProtocolError,
            Self::IllegalSend { .. }
            | Self::InvalidFrame(_)
            | Self::Io(_)
            | Self::SessionClosed
            | Self::QueueFull
            | Self::Config(_) => ErrorCode::InternalError,
        }
    }

    /// True when the error terminates the whole connection (GOAWAY) rather
    /// than a single stream (RST_STREAM).
    pub fn is_connection_error(&self) -> bool {
        !matches!(self, Self::Stream { .. })
    }
}
