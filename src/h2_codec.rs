//! Sans-I/O HTTP/2 connection codec.
//!
//! [`H2Codec`] turns an inbound byte stream into typed [`Frame`]s and then
//! into [`H2Event`]s:
//! 1. Strips the connection preface
//! 2. Splits the buffer into frames and enforces the local maximum frame size
//! 3. Reassembles header blocks spread over HEADERS/PUSH_PROMISE + CONTINUATION
//! 4. Decompresses complete header blocks with the connection's HPACK decoder
//!
//! The outbound counterpart, [`split_header_block`], cuts an encoded header
//! block into frames that fit the peer's maximum frame size.
//!
//! Reference: RFC 7540 Sections 3.5, 4.2 and 6.10

use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::error::{ErrorCode, H2Error};
use crate::frame::{
    Frame, FrameType, H2FrameHeader, HttpFrame, Priority, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_LEN,
};
use crate::hpack::{H2Header, HpackDecoder};

/// Maximum accumulated header block size (256 KB).
/// Prevents unbounded memory growth from malicious/buggy CONTINUATION floods.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// The HTTP/2 connection preface (24 bytes)
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Check if data starts with HTTP/2 connection preface (h2c detection)
pub fn is_h2c_preface(data: &[u8]) -> bool {
    data.starts_with(CONNECTION_PREFACE)
}

/// Events emitted by the codec, one per complete frame or header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum H2Event {
    /// Decoded header list of a HEADERS block
    Headers {
        stream_id: u32,
        headers: Vec<H2Header>,
        end_stream: bool,
        priority: Option<Priority>,
    },
    /// Decoded header list of a PUSH_PROMISE block
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        headers: Vec<H2Header>,
    },
    /// Data for a stream
    Data {
        stream_id: u32,
        data: Vec<u8>,
        end_stream: bool,
    },
    Priority {
        stream_id: u32,
        priority: Priority,
    },
    /// Stream was reset (RST_STREAM)
    StreamReset {
        stream_id: u32,
        error_code: ErrorCode,
    },
    /// Settings frame (connection-level)
    Settings {
        ack: bool,
        /// Parsed settings: (identifier, value) pairs. Empty for ACK frames.
        settings: Vec<(u16, u32)>,
    },
    /// Ping (connection-level)
    Ping { ack: bool, data: [u8; 8] },
    /// Connection-level GOAWAY
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Vec<u8>,
    },
    /// Window update
    WindowUpdate { stream_id: u32, increment: u32 },
}

/// Frame that starts a header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderBlockKind {
    Headers {
        end_stream: bool,
        priority: Option<Priority>,
    },
    PushPromise { promised_stream_id: u32 },
}

/// A header block waiting for CONTINUATION frames.
#[derive(Debug)]
struct PendingBlock {
    stream_id: u32,
    kind: HeaderBlockKind,
    block: Vec<u8>,
}

/// Inbound half of an HTTP/2 connection.
#[derive(Debug)]
pub struct H2Codec {
    /// Buffer for incomplete frames
    buffer: BytesMut,
    /// Connection preface received (for servers)
    preface_received: bool,
    /// Reject a connection that does not start with the preface
    require_preface: bool,
    max_frame_size: u32,
    max_header_block_size: usize,
    /// Bytes of a refused oversized frame still to be skipped
    discard: usize,
    decoder: HpackDecoder,
    pending: Option<PendingBlock>,
}

impl Default for H2Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl H2Codec {
    /// Codec that strips a leading preface when one is present.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            preface_received: false,
            require_preface: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_block_size: MAX_HEADER_BLOCK_SIZE,
            discard: 0,
            decoder: HpackDecoder::new(),
            pending: None,
        }
    }

    /// Codec for the server side, where the peer must open with the preface.
    pub fn server() -> Self {
        Self {
            require_preface: true,
            ..Self::new()
        }
    }

    /// Codec for the client side; servers send no preface magic.
    pub fn client() -> Self {
        Self {
            preface_received: true,
            ..Self::new()
        }
    }

    pub fn preface_received(&self) -> bool {
        self.preface_received
    }

    pub fn set_preface_received(&mut self, received: bool) {
        self.preface_received = received;
    }

    /// Largest inbound payload accepted (our SETTINGS_MAX_FRAME_SIZE).
    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.max_frame_size = max_frame_size;
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    pub fn set_max_header_block_size(&mut self, size: usize) {
        self.max_header_block_size = size;
    }

    /// Largest dynamic table the peer's encoder may ask for (our
    /// SETTINGS_HEADER_TABLE_SIZE).
    pub fn set_header_table_size(&mut self, size: usize) {
        self.decoder.set_max_allowed_table_size(size);
    }

    pub fn decoder(&self) -> &HpackDecoder {
        &self.decoder
    }

    /// Stream id and END_STREAM flag of the header block awaiting
    /// CONTINUATION frames, if any.
    pub fn pending_header_block(&self) -> Option<(u32, bool)> {
        self.pending.as_ref().map(|p| {
            let end_stream = matches!(p.kind, HeaderBlockKind::Headers { end_stream: true, .. });
            (p.stream_id, end_stream)
        })
    }

    /// Append received bytes to the buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Process incoming data and return parsed events.
    ///
    /// This is the main entry point - feed raw bytes and get back events.
    pub fn process(&mut self, data: &[u8]) -> Result<Vec<H2Event>, H2Error> {
        self.feed(data);
        let mut events = Vec::new();
        while let Some(frame) = self.next_frame()? {
            if let Some(event) = self.assemble(frame)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Next complete frame in the buffer, or `None` until more bytes arrive.
    ///
    /// Frames of unknown type are skipped. A frame above the maximum frame
    /// size is a connection error when it could change connection state, and
    /// otherwise a stream error after which the frame is dropped and decoding
    /// can continue.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, H2Error> {
        loop {
            if !self.strip_preface()? || !self.skip_discarded() {
                return Ok(None);
            }

            let Some(header) = H2FrameHeader::parse(&self.buffer) else {
                return Ok(None);
            };
            if header.length > self.max_frame_size {
                return Err(self.refuse_oversized(&header));
            }

            // Check if we have the complete frame
            let total_size = header.total_size();
            if self.buffer.len() < total_size {
                return Ok(None);
            }

            let mut bytes = self.buffer.split_to(total_size);
            bytes.advance(FRAME_HEADER_LEN);
            let raw = HttpFrame::new(
                header.stream_id,
                header.frame_type,
                header.flags,
                bytes.to_vec(),
            );

            match Frame::try_from(raw) {
                Err(H2Error::UnknownFrameType(frame_type)) => {
                    if let Some(pending) = &self.pending {
                        return Err(H2Error::connection(
                            ErrorCode::ProtocolError,
                            format!(
                                "frame type 0x{frame_type:x} inside header block on stream {}",
                                pending.stream_id
                            ),
                        ));
                    }
                    trace!(frame_type, stream_id = header.stream_id, "skipping unknown frame type");
                }
                result => {
                    let frame = result?;
                    trace!(
                        stream_id = header.stream_id,
                        frame_type = %frame.frame_type(),
                        len = header.length,
                        "frame decoded"
                    );
                    return Ok(Some(frame));
                }
            }
        }
    }

    /// Consume the preface if needed. `false` means more bytes are required.
    fn strip_preface(&mut self) -> Result<bool, H2Error> {
        if self.preface_received {
            return Ok(true);
        }
        let n = self.buffer.len().min(CONNECTION_PREFACE.len());
        if self.buffer[..n] != CONNECTION_PREFACE[..n] {
            if self.require_preface {
                return Err(H2Error::connection(
                    ErrorCode::ProtocolError,
                    "invalid connection preface",
                ));
            }
            // No preface on this connection; frames start immediately.
            self.preface_received = true;
            return Ok(true);
        }
        if n < CONNECTION_PREFACE.len() {
            return Ok(false);
        }
        self.buffer.advance(n);
        self.preface_received = true;
        Ok(true)
    }

    /// Drop bytes of a refused frame. `false` means some are still to come.
    fn skip_discarded(&mut self) -> bool {
        let n = self.discard.min(self.buffer.len());
        self.buffer.advance(n);
        self.discard -= n;
        self.discard == 0
    }

    fn refuse_oversized(&mut self, header: &H2FrameHeader) -> H2Error {
        let reason = format!(
            "frame of {} bytes exceeds maximum frame size {}",
            header.length, self.max_frame_size
        );
        let connection_scoped = header.stream_id == 0
            || self.pending.is_some()
            || matches!(
                FrameType::from_u8(header.frame_type),
                Some(
                    FrameType::Headers
                        | FrameType::PushPromise
                        | FrameType::Continuation
                        | FrameType::Settings
                )
            );
        if connection_scoped {
            H2Error::connection(ErrorCode::FrameSizeError, reason)
        } else {
            self.discard = header.total_size();
            H2Error::stream(header.stream_id, ErrorCode::FrameSizeError, reason)
        }
    }

    /// Feed a frame through header-block assembly.
    ///
    /// Returns an event for every frame except HEADERS, PUSH_PROMISE and
    /// CONTINUATION frames that leave their header block incomplete.
    pub fn assemble(&mut self, frame: Frame) -> Result<Option<H2Event>, H2Error> {
        self.check_header_block_sequence(&frame)?;

        let event = match frame {
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
                priority,
                ..
            } => {
                let kind = HeaderBlockKind::Headers {
                    end_stream,
                    priority,
                };
                return self.start_block(stream_id, kind, fragment, end_headers);
            }
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                fragment,
                end_headers,
                ..
            } => {
                let kind = HeaderBlockKind::PushPromise { promised_stream_id };
                return self.start_block(stream_id, kind, fragment, end_headers);
            }
            Frame::Continuation {
                stream_id,
                fragment,
                end_headers,
            } => {
                let Some(mut pending) = self.pending.take() else {
                    return Err(H2Error::connection(
                        ErrorCode::ProtocolError,
                        format!("Unexpected CONTINUATION frame for stream {stream_id}"),
                    ));
                };
                // Guard against unbounded header block accumulation
                let new_size = pending.block.len() + fragment.len();
                if new_size > self.max_header_block_size {
                    return Err(self.block_too_large(new_size));
                }
                pending.block.extend_from_slice(&fragment);
                if !end_headers {
                    self.pending = Some(pending);
                    return Ok(None);
                }
                return self.finish_block(pending).map(Some);
            }
            Frame::Data {
                stream_id,
                data,
                end_stream,
                ..
            } => H2Event::Data {
                stream_id,
                data,
                end_stream,
            },
            Frame::Priority {
                stream_id,
                priority,
            } => H2Event::Priority {
                stream_id,
                priority,
            },
            Frame::RstStream {
                stream_id,
                error_code,
            } => H2Event::StreamReset {
                stream_id,
                error_code,
            },
            Frame::Settings { ack, settings } => H2Event::Settings { ack, settings },
            Frame::Ping { ack, data } => H2Event::Ping { ack, data },
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => H2Event::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            },
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => H2Event::WindowUpdate {
                stream_id,
                increment,
            },
        };
        Ok(Some(event))
    }

    /// While a header block is incomplete, only CONTINUATION frames on the
    /// same stream may arrive (RFC 7540 Section 6.10).
    pub fn check_header_block_sequence(&self, frame: &Frame) -> Result<(), H2Error> {
        let Some(pending) = &self.pending else {
            return Ok(());
        };
        match frame {
            Frame::Continuation { stream_id, .. } if *stream_id == pending.stream_id => Ok(()),
            Frame::Continuation { stream_id, .. } => Err(H2Error::connection(
                ErrorCode::ProtocolError,
                format!(
                    "CONTINUATION for stream {} but pending headers on stream {}",
                    stream_id, pending.stream_id
                ),
            )),
            other => Err(H2Error::connection(
                ErrorCode::ProtocolError,
                format!(
                    "{} frame while header block on stream {} is incomplete",
                    other.frame_type(),
                    pending.stream_id
                ),
            )),
        }
    }

    fn start_block(
        &mut self,
        stream_id: u32,
        kind: HeaderBlockKind,
        fragment: Vec<u8>,
        end_headers: bool,
    ) -> Result<Option<H2Event>, H2Error> {
        if fragment.len() > self.max_header_block_size {
            return Err(self.block_too_large(fragment.len()));
        }
        let pending = PendingBlock {
            stream_id,
            kind,
            block: fragment,
        };
        if end_headers {
            self.finish_block(pending).map(Some)
        } else {
            // Headers span multiple frames - accumulate and wait for CONTINUATION
            self.pending = Some(pending);
            Ok(None)
        }
    }

    fn finish_block(&mut self, pending: PendingBlock) -> Result<H2Event, H2Error> {
        let headers = self.decoder.decode_header_list(&pending.block)?;
        Ok(match pending.kind {
            HeaderBlockKind::Headers {
                end_stream,
                priority,
            } => H2Event::Headers {
                stream_id: pending.stream_id,
                headers,
                end_stream,
                priority,
            },
            HeaderBlockKind::PushPromise { promised_stream_id } => H2Event::PushPromise {
                stream_id: pending.stream_id,
                promised_stream_id,
                headers,
            },
        })
    }

    fn block_too_large(&self, size: usize) -> H2Error {
        H2Error::connection(
            ErrorCode::EnhanceYourCalm,
            format!(
                "Header block too large ({} bytes, max {})",
                size, self.max_header_block_size
            ),
        )
    }

    /// Reset codec state for a new connection. Limits are kept.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.preface_received = false;
        self.discard = 0;
        self.pending = None;
        let allowed = self.decoder.max_allowed_table_size();
        self.decoder = HpackDecoder::new();
        self.decoder.set_max_allowed_table_size(allowed);
    }
}

/// Cut an encoded header block into a HEADERS or PUSH_PROMISE frame followed
/// by as many CONTINUATION frames as needed to respect `max_frame_size`.
/// Only the last frame carries END_HEADERS.
pub fn split_header_block(
    stream_id: u32,
    kind: HeaderBlockKind,
    block: Vec<u8>,
    max_frame_size: u32,
) -> Vec<Frame> {
    let max = max_frame_size as usize;
    let first_room = match kind {
        HeaderBlockKind::Headers {
            priority: Some(_), ..
        } => max - Priority::LEN,
        HeaderBlockKind::Headers { .. } => max,
        HeaderBlockKind::PushPromise { .. } => max - 4,
    };

    let split = first_room.min(block.len());
    let mut rest = &block[split..];
    let first_fragment = block[..split].to_vec();
    let single = rest.is_empty();

    let mut frames = vec![match kind {
        HeaderBlockKind::Headers {
            end_stream,
            priority,
        } => Frame::Headers {
            stream_id,
            fragment: first_fragment,
            end_stream,
            end_headers: single,
            priority,
            padding: None,
        },
        HeaderBlockKind::PushPromise { promised_stream_id } => Frame::PushPromise {
            stream_id,
            promised_stream_id,
            fragment: first_fragment,
            end_headers: single,
            padding: None,
        },
    }];

    while !rest.is_empty() {
        let (chunk, tail) = rest.split_at(max.min(rest.len()));
        rest = tail;
        frames.push(Frame::Continuation {
            stream_id,
            fragment: chunk.to_vec(),
            end_headers: rest.is_empty(),
        });
    }
    frames
}
