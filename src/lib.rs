//! h2-wire: HTTP/2 framing, HPACK and stream state, with a tokio session
//!
//! The lower layers are sans-I/O and synchronous; only [`session`] touches
//! the network.
//!
//! # Features
//!
//! - **Frame codec**: all ten RFC 7540 frame types, with the size, stream-id
//!   and padding checks of Section 6
//! - **HPACK**: RFC 7541 encoder and decoder with Huffman coding and a
//!   dynamic table
//! - **CONTINUATION assembly**: header blocks are reassembled and decoded
//!   into header lists
//! - **Stream state machine**: a pure transition function over the seven
//!   stream states
//! - **Session**: preface and SETTINGS handshake, PING replies, RST_STREAM
//!   and GOAWAY on protocol errors, a bounded outbound queue
//!
//! # Quick Start
//!
//! ```rust
//! use h2_wire::{H2Codec, H2Event};
//!
//! // Client side: the server sends no preface magic
//! let mut codec = H2Codec::client();
//!
//! // DATA frame, 5 bytes, stream 1
//! let frame_bytes = [0, 0, 5, 0, 0, 0, 0, 0, 1, b'h', b'e', b'l', b'l', b'o'];
//! let events = codec.process(&frame_bytes).unwrap();
//!
//! for event in events {
//!     match event {
//!         H2Event::Headers { stream_id, headers, .. } => {
//!             println!("Headers on stream {}: {} fields", stream_id, headers.len());
//!         }
//!         H2Event::Data { stream_id, data, .. } => {
//!             println!("Data on stream {}: {} bytes", stream_id, data.len());
//!         }
//!         _ => {}
//!     }
//! }
//! ```
//!
//! Flow control, priority scheduling and TLS are out of scope: WINDOW_UPDATE
//! and PRIORITY frames are parsed and passed on but never acted upon.

pub mod config;
pub mod error;
pub mod frame;
pub mod h2_codec;
pub mod hpack;
pub mod session;
pub mod settings;
pub mod stream;

pub use config::{ConfigError, SessionConfig};
pub use error::{ErrorCode, H2Error, HpackError};
pub use frame::{
    flags, frame_type, Frame, FrameType, H2FrameHeader, HttpFrame, Priority,
    DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_LEN, MAX_FRAME_SIZE_LIMIT,
};
pub use h2_codec::{
    is_h2c_preface, split_header_block, H2Codec, H2Event, HeaderBlockKind,
    CONNECTION_PREFACE, MAX_HEADER_BLOCK_SIZE,
};
pub use hpack::{H2Header, HpackDecoder, HpackEncoder, Indexing};
pub use session::{Application, Outbox, Session, SessionHandle};
pub use settings::{settings_id, Settings};
pub use stream::{transition, Direction, Role, StreamState, StreamTable, Violation};
