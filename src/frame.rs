//! HTTP/2 frame encoding/decoding (RFC 7540 Section 4 and 6).
//!
//! Every frame has a fixed 9-byte header:
//! ```text
//! +-----------------------------------------------+
//! |                 Length (24)                   |
//! +---------------+---------------+---------------+
//! |   Type (8)    |   Flags (8)   |
//! +-+-------------+---------------+-------------------------------+
//! |R|                 Stream Identifier (31)                      |
//! +=+=============================================================+
//! |                   Frame Payload (0...)                      ...
//! +---------------------------------------------------------------+
//! ```
//!
//! [`HttpFrame`] is the raw form (header fields plus opaque payload);
//! [`Frame`] is the typed form. Header-bearing frames keep their HPACK
//! fragment as bytes so the two convert into each other without loss; the
//! fragments are compressed and decompressed by [`crate::h2_codec`].

use bytes::{Buf, BufMut};

use crate::error::{ErrorCode, H2Error};

/// Frame header size in bytes.
pub const FRAME_HEADER_LEN: usize = 9;

/// Initial SETTINGS_MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Largest value SETTINGS_MAX_FRAME_SIZE may take (2^24 - 1).
pub const MAX_FRAME_SIZE_LIMIT: u32 = 16_777_215;

const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;

/// HTTP/2 frame types (RFC 7540 Section 6)
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

/// HTTP/2 frame flags
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// The ten frame types as an enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Data = frame_type::DATA,
    Headers = frame_type::HEADERS,
    Priority = frame_type::PRIORITY,
    RstStream = frame_type::RST_STREAM,
    Settings = frame_type::SETTINGS,
    PushPromise = frame_type::PUSH_PROMISE,
    Ping = frame_type::PING,
    GoAway = frame_type::GOAWAY,
    WindowUpdate = frame_type::WINDOW_UPDATE,
    Continuation = frame_type::CONTINUATION,
}

impl FrameType {
    pub const ALL: [FrameType; 10] = [
        FrameType::Data,
        FrameType::Headers,
        FrameType::Priority,
        FrameType::RstStream,
        FrameType::Settings,
        FrameType::PushPromise,
        FrameType::Ping,
        FrameType::GoAway,
        FrameType::WindowUpdate,
        FrameType::Continuation,
    ];

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameType::Data => "DATA",
            FrameType::Headers => "HEADERS",
            FrameType::Priority => "PRIORITY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::PushPromise => "PUSH_PROMISE",
            FrameType::Ping => "PING",
            FrameType::GoAway => "GOAWAY",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::Continuation => "CONTINUATION",
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed HTTP/2 frame header (9 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H2FrameHeader {
    pub length: u32, // 24 bits
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32, // 31 bits (high bit reserved)
}

impl H2FrameHeader {
    /// Parse a 9-byte frame header
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return None;
        }
        let mut buf = &data[..FRAME_HEADER_LEN];
        let length = buf.get_uint(3) as u32;
        let frame_type = buf.get_u8();
        let flags = buf.get_u8();
        let stream_id = buf.get_u32() & STREAM_ID_MASK; // Clear reserved bit

        Some(Self {
            length,
            frame_type,
            flags,
            stream_id,
        })
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_uint(self.length as u64, 3);
        buf.put_u8(self.frame_type);
        buf.put_u8(self.flags);
        buf.put_u32(self.stream_id & STREAM_ID_MASK);
    }

    /// Total frame size including header
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_LEN + self.length as usize
    }

    /// Check if END_STREAM flag is set
    pub fn is_end_stream(&self) -> bool {
        self.flags & flags::END_STREAM != 0
    }

    /// Check if END_HEADERS flag is set
    pub fn is_end_headers(&self) -> bool {
        self.flags & flags::END_HEADERS != 0
    }
}

/// A frame as it sits on the wire: header fields plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFrame {
    pub stream_id: u32,
    pub frame_type: u8,
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl HttpFrame {
    pub fn new(stream_id: u32, frame_type: u8, flags: u8, payload: Vec<u8>) -> Self {
        Self {
            stream_id,
            frame_type,
            flags,
            payload,
        }
    }

    pub fn header(&self) -> H2FrameHeader {
        H2FrameHeader {
            length: self.payload.len() as u32,
            frame_type: self.frame_type,
            flags: self.flags,
            stream_id: self.stream_id,
        }
    }

    /// Append header and payload to `buf`. A payload larger than
    /// `max_frame_size` is refused, never truncated.
    pub fn encode(&self, max_frame_size: u32, buf: &mut impl BufMut) -> Result<(), H2Error> {
        if self.payload.len() > max_frame_size as usize {
            return Err(H2Error::FrameTooLarge {
                len: self.payload.len(),
                max: max_frame_size,
            });
        }
        self.header().encode(buf);
        buf.put_slice(&self.payload);
        Ok(())
    }

    pub fn to_bytes(&self, max_frame_size: u32) -> Result<Vec<u8>, H2Error> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        self.encode(max_frame_size, &mut buf)?;
        Ok(buf)
    }
}

/// Stream dependency and weight carried by PRIORITY and HEADERS frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive: bool,
    pub dependency: u32,
    pub weight: u8,
}

impl Priority {
    pub const LEN: usize = 5;

    fn parse(mut buf: &[u8]) -> Self {
        let dep = buf.get_u32();
        Self {
            exclusive: dep & 0x8000_0000 != 0,
            dependency: dep & STREAM_ID_MASK,
            weight: buf.get_u8(),
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        let mut dep = self.dependency & STREAM_ID_MASK;
        if self.exclusive {
            dep |= 0x8000_0000;
        }
        buf.put_u32(dep);
        buf.put_u8(self.weight);
    }
}

/// An HTTP/2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// DATA (0x0): stream payload.
    Data {
        stream_id: u32,
        data: Vec<u8>,
        end_stream: bool,
        /// Pad length; `Some` sets PADDED.
        padding: Option<u8>,
    },
    /// HEADERS (0x1): opens a stream and carries a header block fragment.
    Headers {
        stream_id: u32,
        fragment: Vec<u8>,
        end_stream: bool,
        end_headers: bool,
        priority: Option<Priority>,
        padding: Option<u8>,
    },
    /// PRIORITY (0x2)
    Priority { stream_id: u32, priority: Priority },
    /// RST_STREAM (0x3)
    RstStream { stream_id: u32, error_code: ErrorCode },
    /// SETTINGS (0x4): (identifier, value) pairs in wire order; empty on ACK.
    Settings { ack: bool, settings: Vec<(u16, u32)> },
    /// PUSH_PROMISE (0x5)
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        fragment: Vec<u8>,
        end_headers: bool,
        padding: Option<u8>,
    },
    /// PING (0x6): exactly 8 opaque bytes.
    Ping { ack: bool, data: [u8; 8] },
    /// GOAWAY (0x7)
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Vec<u8>,
    },
    /// WINDOW_UPDATE (0x8)
    WindowUpdate { stream_id: u32, increment: u32 },
    /// CONTINUATION (0x9)
    Continuation {
        stream_id: u32,
        fragment: Vec<u8>,
        end_headers: bool,
    },
}

impl Frame {
    pub fn data(stream_id: u32, data: impl Into<Vec<u8>>, end_stream: bool) -> Self {
        Frame::Data {
            stream_id,
            data: data.into(),
            end_stream,
            padding: None,
        }
    }

    pub fn ping(data: [u8; 8]) -> Self {
        Frame::Ping { ack: false, data }
    }

    pub fn ping_ack(data: [u8; 8]) -> Self {
        Frame::Ping { ack: true, data }
    }

    pub fn settings(settings: Vec<(u16, u32)>) -> Self {
        Frame::Settings {
            ack: false,
            settings,
        }
    }

    pub fn settings_ack() -> Self {
        Frame::Settings {
            ack: true,
            settings: Vec::new(),
        }
    }

    pub fn rst_stream(stream_id: u32, error_code: ErrorCode) -> Self {
        Frame::RstStream {
            stream_id,
            error_code,
        }
    }

    pub fn go_away(
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: impl Into<Vec<u8>>,
    ) -> Self {
        Frame::GoAway {
            last_stream_id,
            error_code,
            debug_data: debug_data.into(),
        }
    }

    pub fn window_update(stream_id: u32, increment: u32) -> Self {
        Frame::WindowUpdate {
            stream_id,
            increment,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Data { .. } => FrameType::Data,
            Frame::Headers { .. } => FrameType::Headers,
            Frame::Priority { .. } => FrameType::Priority,
            Frame::RstStream { .. } => FrameType::RstStream,
            Frame::Settings { .. } => FrameType::Settings,
            Frame::PushPromise { .. } => FrameType::PushPromise,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::GoAway { .. } => FrameType::GoAway,
            Frame::WindowUpdate { .. } => FrameType::WindowUpdate,
            Frame::Continuation { .. } => FrameType::Continuation,
        }
    }

    /// Stream the frame belongs to; 0 for connection-level frames.
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::Priority { stream_id, .. }
            | Frame::RstStream { stream_id, .. }
            | Frame::PushPromise { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Continuation { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => 0,
        }
    }

    /// END_STREAM as carried by this frame alone.
    pub fn is_end_stream(&self) -> bool {
        match self {
            Frame::Data { end_stream, .. } | Frame::Headers { end_stream, .. } => *end_stream,
            _ => false,
        }
    }

    /// Payload length this frame will have on the wire.
    pub fn payload_len(&self) -> usize {
        let padded = |padding: &Option<u8>| padding.map_or(0, |p| 1 + p as usize);
        match self {
            Frame::Data { data, padding, .. } => data.len() + padded(padding),
            Frame::Headers {
                fragment,
                priority,
                padding,
                ..
            } => {
                fragment.len()
                    + padded(padding)
                    + if priority.is_some() { Priority::LEN } else { 0 }
            }
            Frame::Priority { .. } => Priority::LEN,
            Frame::RstStream { .. } | Frame::WindowUpdate { .. } => 4,
            Frame::Settings { settings, .. } => settings.len() * 6,
            Frame::PushPromise {
                fragment, padding, ..
            } => 4 + fragment.len() + padded(padding),
            Frame::Ping { .. } => 8,
            Frame::GoAway { debug_data, .. } => 8 + debug_data.len(),
            Frame::Continuation { fragment, .. } => fragment.len(),
        }
    }

    /// Raw form of this frame.
    pub fn to_http_frame(&self) -> HttpFrame {
        let mut payload = Vec::with_capacity(self.payload_len());
        let mut flag_bits = 0u8;

        match self {
            Frame::Data {
                data,
                end_stream,
                padding,
                ..
            } => {
                if *end_stream {
                    flag_bits |= flags::END_STREAM;
                }
                write_padded(&mut payload, &mut flag_bits, *padding, |p| p.put_slice(data));
            }
            Frame::Headers {
                fragment,
                end_stream,
                end_headers,
                priority,
                padding,
                ..
            } => {
                if *end_stream {
                    flag_bits |= flags::END_STREAM;
                }
                if *end_headers {
                    flag_bits |= flags::END_HEADERS;
                }
                if priority.is_some() {
                    flag_bits |= flags::PRIORITY;
                }
                write_padded(&mut payload, &mut flag_bits, *padding, |p| {
                    if let Some(priority) = priority {
                        priority.encode(p);
                    }
                    p.put_slice(fragment);
                });
            }
            Frame::Priority { priority, .. } => priority.encode(&mut payload),
            Frame::RstStream { error_code, .. } => payload.put_u32(error_code.as_u32()),
            Frame::Settings { ack, settings } => {
                if *ack {
                    flag_bits |= flags::ACK;
                }
                for &(id, value) in settings {
                    payload.put_u16(id);
                    payload.put_u32(value);
                }
            }
            Frame::PushPromise {
                promised_stream_id,
                fragment,
                end_headers,
                padding,
                ..
            } => {
                if *end_headers {
                    flag_bits |= flags::END_HEADERS;
                }
                write_padded(&mut payload, &mut flag_bits, *padding, |p| {
                    p.put_u32(promised_stream_id & STREAM_ID_MASK);
                    p.put_slice(fragment);
                });
            }
            Frame::Ping { ack, data } => {
                if *ack {
                    flag_bits |= flags::ACK;
                }
                payload.put_slice(data);
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                payload.put_u32(last_stream_id & STREAM_ID_MASK);
                payload.put_u32(error_code.as_u32());
                payload.put_slice(debug_data);
            }
            Frame::WindowUpdate { increment, .. } => payload.put_u32(increment & STREAM_ID_MASK),
            Frame::Continuation {
                fragment,
                end_headers,
                ..
            } => {
                if *end_headers {
                    flag_bits |= flags::END_HEADERS;
                }
                payload.put_slice(fragment);
            }
        }

        HttpFrame::new(self.stream_id(), self.frame_type() as u8, flag_bits, payload)
    }

    /// Encode header and payload into `buf`.
    pub fn encode(&self, max_frame_size: u32, buf: &mut impl BufMut) -> Result<(), H2Error> {
        self.to_http_frame().encode(max_frame_size, buf)
    }
}

fn write_padded(
    payload: &mut Vec<u8>,
    flag_bits: &mut u8,
    padding: Option<u8>,
    body: impl FnOnce(&mut Vec<u8>),
) {
    match padding {
        Some(pad) => {
            *flag_bits |= flags::PADDED;
            payload.put_u8(pad);
            body(payload);
            payload.put_bytes(0, pad as usize);
        }
        None => body(payload),
    }
}

fn require_stream(stream_id: u32, kind: FrameType) -> Result<(), H2Error> {
    if stream_id == 0 {
        return Err(H2Error::connection(
            ErrorCode::ProtocolError,
            format!("{kind} frame on stream 0"),
        ));
    }
    Ok(())
}

fn require_connection(stream_id: u32, kind: FrameType) -> Result<(), H2Error> {
    if stream_id != 0 {
        return Err(H2Error::connection(
            ErrorCode::ProtocolError,
            format!("{kind} frame on stream {stream_id}"),
        ));
    }
    Ok(())
}

/// Strip the pad length byte and trailing padding when PADDED is set.
fn strip_padding(
    flag_bits: u8,
    mut payload: Vec<u8>,
    kind: FrameType,
) -> Result<(Vec<u8>, Option<u8>), H2Error> {
    if flag_bits & flags::PADDED == 0 {
        return Ok((payload, None));
    }
    let Some(&pad) = payload.first() else {
        return Err(H2Error::connection(
            ErrorCode::FrameSizeError,
            format!("PADDED {kind} frame with no payload"),
        ));
    };
    if pad as usize >= payload.len() {
        return Err(H2Error::connection(
            ErrorCode::ProtocolError,
            format!("Invalid padding length in {kind} frame"),
        ));
    }
    payload.truncate(payload.len() - pad as usize);
    payload.remove(0);
    Ok((payload, Some(pad)))
}

impl TryFrom<HttpFrame> for Frame {
    type Error = H2Error;

    fn try_from(raw: HttpFrame) -> Result<Self, H2Error> {
        let HttpFrame {
            stream_id,
            frame_type,
            flags: flag_bits,
            payload,
        } = raw;
        let kind = FrameType::from_u8(frame_type).ok_or(H2Error::UnknownFrameType(frame_type))?;

        let frame = match kind {
            FrameType::Data => {
                require_stream(stream_id, kind)?;
                let (data, padding) = strip_padding(flag_bits, payload, kind)?;
                Frame::Data {
                    stream_id,
                    data,
                    end_stream: flag_bits & flags::END_STREAM != 0,
                    padding,
                }
            }
            FrameType::Headers => {
                require_stream(stream_id, kind)?;
                let (mut fragment, padding) = strip_padding(flag_bits, payload, kind)?;
                let priority = if flag_bits & flags::PRIORITY != 0 {
                    if fragment.len() < Priority::LEN {
                        return Err(H2Error::connection(
                            ErrorCode::FrameSizeError,
                            "PRIORITY HEADERS frame with insufficient data",
                        ));
                    }
                    let priority = Priority::parse(&fragment[..Priority::LEN]);
                    fragment.drain(..Priority::LEN);
                    Some(priority)
                } else {
                    None
                };
                Frame::Headers {
                    stream_id,
                    fragment,
                    end_stream: flag_bits & flags::END_STREAM != 0,
                    end_headers: flag_bits & flags::END_HEADERS != 0,
                    priority,
                    padding,
                }
            }
            FrameType::Priority => {
                require_stream(stream_id, kind)?;
                if payload.len() != Priority::LEN {
                    return Err(H2Error::stream(
                        stream_id,
                        ErrorCode::FrameSizeError,
                        format!("PRIORITY frame of {} bytes", payload.len()),
                    ));
                }
                let priority = Priority::parse(&payload);
                if priority.dependency == stream_id {
                    return Err(H2Error::stream(
                        stream_id,
                        ErrorCode::ProtocolError,
                        "stream depends on itself",
                    ));
                }
                Frame::Priority {
                    stream_id,
                    priority,
                }
            }
            FrameType::RstStream => {
                require_stream(stream_id, kind)?;
                if payload.len() != 4 {
                    return Err(H2Error::connection(
                        ErrorCode::FrameSizeError,
                        format!("RST_STREAM frame of {} bytes", payload.len()),
                    ));
                }
                Frame::RstStream {
                    stream_id,
                    error_code: ErrorCode::from_u32((&payload[..]).get_u32()),
                }
            }
            FrameType::Settings => {
                require_connection(stream_id, kind)?;
                let ack = flag_bits & flags::ACK != 0;
                if ack && !payload.is_empty() {
                    return Err(H2Error::connection(
                        ErrorCode::FrameSizeError,
                        "SETTINGS ACK with a payload",
                    ));
                }
                if payload.len() % 6 != 0 {
                    return Err(H2Error::connection(
                        ErrorCode::FrameSizeError,
                        format!("SETTINGS frame of {} bytes", payload.len()),
                    ));
                }
                let settings = payload
                    .chunks_exact(6)
                    .map(|mut entry| (entry.get_u16(), entry.get_u32()))
                    .collect();
                Frame::Settings { ack, settings }
            }
            FrameType::PushPromise => {
                require_stream(stream_id, kind)?;
                let (mut body, padding) = strip_padding(flag_bits, payload, kind)?;
                if body.len() < 4 {
                    return Err(H2Error::connection(
                        ErrorCode::FrameSizeError,
                        "PUSH_PROMISE frame too short",
                    ));
                }
                let promised_stream_id = (&body[..4]).get_u32() & STREAM_ID_MASK;
                body.drain(..4);
                Frame::PushPromise {
                    stream_id,
                    promised_stream_id,
                    fragment: body,
                    end_headers: flag_bits & flags::END_HEADERS != 0,
                    padding,
                }
            }
            FrameType::Ping => {
                require_connection(stream_id, kind)?;
                let data: [u8; 8] = payload.as_slice().try_into().map_err(|_| {
                    H2Error::stream(
                        stream_id,
                        ErrorCode::FrameSizeError,
                        format!("PING payload must be 8 bytes, not {}", payload.len()),
                    )
                })?;
                Frame::Ping {
                    ack: flag_bits & flags::ACK != 0,
                    data,
                }
            }
            FrameType::GoAway => {
                require_connection(stream_id, kind)?;
                if payload.len() < 8 {
                    return Err(H2Error::connection(
                        ErrorCode::FrameSizeError,
                        "GOAWAY frame too short",
                    ));
                }
                let mut buf = &payload[..];
                let last_stream_id = buf.get_u32() & STREAM_ID_MASK;
                let error_code = ErrorCode::from_u32(buf.get_u32());
                Frame::GoAway {
                    last_stream_id,
                    error_code,
                    debug_data: buf.to_vec(),
                }
            }
            FrameType::WindowUpdate => {
                if payload.len() != 4 {
                    return Err(H2Error::connection(
                        ErrorCode::FrameSizeError,
                        format!("WINDOW_UPDATE frame of {} bytes", payload.len()),
                    ));
                }
                let increment = (&payload[..]).get_u32() & STREAM_ID_MASK;
                if increment == 0 {
                    let reason = "WINDOW_UPDATE with zero increment";
                    return Err(if stream_id == 0 {
                        H2Error::connection(ErrorCode::ProtocolError, reason)
                    } else {
                        H2Error::stream(stream_id, ErrorCode::ProtocolError, reason)
                    });
                }
                Frame::WindowUpdate {
                    stream_id,
                    increment,
                }
            }
            FrameType::Continuation => {
                require_stream(stream_id, kind)?;
                Frame::Continuation {
                    stream_id,
                    fragment: payload,
                    end_headers: flag_bits & flags::END_HEADERS != 0,
                }
            }
        };

        Ok(frame)
    }
}
