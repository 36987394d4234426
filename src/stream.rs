//! Stream states and their legal transitions (RFC 7540 Section 5.1).
//!
//! ```text
//!                          +--------+
//!                  send PP |        | recv PP
//!                 ,--------|  idle  |--------.
//!                /         |        |         \
//!               v          +--------+          v
//!        +----------+          |           +----------+
//!        |          |          | send H /  |          |
//! ,------| reserved |          | recv H    | reserved |------.
//! |      | (local)  |          |           | (remote) |      |
//! |      +----------+          v           +----------+      |
//! |          |             +--------+             |          |
//! |          |     recv ES |        | send ES     |          |
//! |   send H |     ,-------|  open  |-------.     | recv H   |
//! |          |    /        |        |        \    |          |
//! |          v   v         +--------+         v   v          |
//! |      +----------+          |           +----------+      |
//! |      |   half   |          |           |   half   |      |
//! |      |  closed  |          | send R /  |  closed  |      |
//! |      | (remote) |          | recv R    | (local)  |      |
//! |      +----------+          |           +----------+      |
//! |           |                |                 |           |
//! |           | send ES /      |       recv ES / |           |
//! |           | send R /       v        send R / |           |
//! |           | recv R     +--------+   recv R   |           |
//! | send R /  `----------->|        |<-----------'  send R / |
//! | recv R                 | closed |               recv R   |
//! `----------------------->|        |<----------------------'
//!                          +--------+
//! ```
//!
//! [`transition`] is the whole rule table as one pure function, so every
//! (state, direction, frame type) combination is visible and testable.
//! [`StreamTable`] layers stream-id rules and the closed-state grace period
//! on top.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{ErrorCode, H2Error};
use crate::frame::FrameType;

/// Stream states (RFC 7540 Section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    pub const ALL: [StreamState; 7] = [
        StreamState::Idle,
        StreamState::ReservedLocal,
        StreamState::ReservedRemote,
        StreamState::Open,
        StreamState::HalfClosedLocal,
        StreamState::HalfClosedRemote,
        StreamState::Closed,
    ];
}

/// Whether a frame is being sent by this endpoint or received from the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Send,
    Recv,
}

/// Which side of the connection this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// Whether `stream_id` has the parity of streams this role opens.
    pub fn initiates(self, stream_id: u32) -> bool {
        match self {
            Role::Client => stream_id % 2 == 1,
            Role::Server => stream_id != 0 && stream_id % 2 == 0,
        }
    }

    pub fn peer(self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

/// Why a transition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// Received frame that breaks the connection (GOAWAY).
    Connection(ErrorCode),
    /// Received frame that breaks only this stream (RST_STREAM).
    Stream(ErrorCode),
    /// Local attempt to send a frame the state does not allow.
    IllegalSend,
}

/// Next state after `frame_type` passes through a stream in `state`.
///
/// `end_stream` is the END_STREAM flag of DATA and HEADERS, or, for the
/// CONTINUATION that ends a header block, the flag of the HEADERS frame
/// the block started with. It is ignored for every other type.
pub fn transition(
    state: StreamState,
    direction: Direction,
    frame_type: FrameType,
    end_stream: bool,
) -> Result<StreamState, Violation> {
    use Direction::{Recv, Send};
    use FrameType as F;
    use StreamState as S;

    let ends = end_stream && matches!(frame_type, F::Data | F::Headers | F::Continuation);
    let refuse = match direction {
        Send => Violation::IllegalSend,
        Recv => Violation::Connection(ErrorCode::ProtocolError),
    };

    match (state, direction, frame_type) {
        (S::Idle, _, F::Headers) => Ok(match (direction, ends) {
            (_, false) => S::Open,
            (Send, true) => S::HalfClosedLocal,
            (Recv, true) => S::HalfClosedRemote,
        }),
        (S::Idle, _, F::Priority) => Ok(S::Idle),
        (S::Idle, _, _) => Err(refuse),

        (S::ReservedLocal, Send, F::Headers) => Ok(if ends {
            S::Closed
        } else {
            S::HalfClosedRemote
        }),
        (S::ReservedLocal, _, F::RstStream) => Ok(S::Closed),
        (S::ReservedLocal, _, F::Priority) => Ok(S::ReservedLocal),
        (S::ReservedLocal, Recv, F::WindowUpdate) => Ok(S::ReservedLocal),
        (S::ReservedLocal, _, _) => Err(refuse),

        (S::ReservedRemote, Recv, F::Headers) => Ok(if ends {
            S::Closed
        } else {
            S::HalfClosedLocal
        }),
        (S::ReservedRemote, _, F::RstStream) => Ok(S::Closed),
        (S::ReservedRemote, _, F::Priority) => Ok(S::ReservedRemote),
        (S::ReservedRemote, Send, F::WindowUpdate) => Ok(S::ReservedRemote),
        (S::ReservedRemote, _, _) => Err(refuse),

        (S::Open, _, F::RstStream) => Ok(S::Closed),
        (S::Open, Send, _) if ends => Ok(S::HalfClosedLocal),
        (S::Open, Recv, _) if ends => Ok(S::HalfClosedRemote),
        (S::Open, _, _) => Ok(S::Open),

        (S::HalfClosedLocal, _, F::RstStream) => Ok(S::Closed),
        (S::HalfClosedLocal, Recv, _) => Ok(if ends { S::Closed } else { S::HalfClosedLocal }),
        (S::HalfClosedLocal, Send, F::WindowUpdate | F::Priority) => Ok(S::HalfClosedLocal),
        (S::HalfClosedLocal, Send, _) => Err(Violation::IllegalSend),

        (S::HalfClosedRemote, _, F::RstStream) => Ok(S::Closed),
        (S::HalfClosedRemote, Send, _) => Ok(if ends { S::Closed } else { S::HalfClosedRemote }),
        (S::HalfClosedRemote, Recv, F::WindowUpdate | F::Priority) => Ok(S::HalfClosedRemote),
        (S::HalfClosedRemote, Recv, _) => Err(Violation::Stream(ErrorCode::StreamClosed)),

        (S::Closed, _, F::Priority | F::WindowUpdate | F::RstStream) => Ok(S::Closed),
        (S::Closed, Send, _) => Err(Violation::IllegalSend),
        (S::Closed, Recv, _) => Err(Violation::Stream(ErrorCode::StreamClosed)),
    }
}

/// State after PUSH_PROMISE reserves a stream in `state`.
pub fn reserve(state: StreamState, direction: Direction) -> Result<StreamState, Violation> {
    match (state, direction) {
        (StreamState::Idle, Direction::Send) => Ok(StreamState::ReservedLocal),
        (StreamState::Idle, Direction::Recv) => Ok(StreamState::ReservedRemote),
        (_, Direction::Send) => Err(Violation::IllegalSend),
        (_, Direction::Recv) => Err(Violation::Connection(ErrorCode::ProtocolError)),
    }
}

/// One stream of a connection.
#[derive(Debug, Clone)]
pub struct Stream {
    id: u32,
    state: StreamState,
    closed_at: Option<Instant>,
}

impl Stream {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            closed_at: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Run one frame through the state machine.
    ///
    /// A WINDOW_UPDATE received more than `grace` after the stream closed is
    /// a STREAM_CLOSED stream error; within the grace period it is absorbed.
    pub fn on_frame(
        &mut self,
        direction: Direction,
        frame_type: FrameType,
        end_stream: bool,
        grace: Duration,
    ) -> Result<StreamState, H2Error> {
        if let (Some(closed_at), Direction::Recv, FrameType::WindowUpdate) =
            (self.closed_at, direction, frame_type)
        {
            if closed_at.elapsed() > grace {
                return Err(H2Error::stream(
                    self.id,
                    ErrorCode::StreamClosed,
                    "WINDOW_UPDATE long after the stream closed",
                ));
            }
        }

        let next = transition(self.state, direction, frame_type, end_stream)
            .map_err(|v| self.violation(v, frame_type))?;
        self.set_state(next);
        Ok(next)
    }

    /// Reserve this stream for a PUSH_PROMISE.
    pub fn on_reserve(&mut self, direction: Direction) -> Result<StreamState, H2Error> {
        let next = reserve(self.state, direction)
            .map_err(|v| self.violation(v, FrameType::PushPromise))?;
        self.set_state(next);
        Ok(next)
    }

    fn set_state(&mut self, next: StreamState) {
        if next == StreamState::Closed && self.closed_at.is_none() {
            self.closed_at = Some(Instant::now());
        }
        self.state = next;
    }

    fn violation(&self, violation: Violation, frame_type: FrameType) -> H2Error {
        let reason = || format!("{frame_type} on stream {} in state {:?}", self.id, self.state);
        match violation {
            Violation::Connection(code) => H2Error::connection(code, reason()),
            Violation::Stream(code) => H2Error::stream(self.id, code, reason()),
            Violation::IllegalSend => H2Error::IllegalSend {
                stream_id: self.id,
                frame_type: frame_type.name(),
                state: self.state,
            },
        }
    }
}

/// Every stream of one connection, keyed by id.
///
/// Streams are created on first reference and kept until the connection
/// ends.
#[derive(Debug)]
pub struct StreamTable {
    streams: HashMap<u32, Stream>,
    role: Role,
    strict_ids: bool,
    grace: Duration,
    last_peer_id: u32,
    last_local_id: u32,
}

impl StreamTable {
    pub fn new(role: Role, strict_ids: bool, grace: Duration) -> Self {
        Self {
            streams: HashMap::new(),
            role,
            strict_ids,
            grace,
            last_peer_id: 0,
            last_local_id: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn get(&self, stream_id: u32) -> Option<&Stream> {
        self.streams.get(&stream_id)
    }

    pub fn state(&self, stream_id: u32) -> StreamState {
        self.streams
            .get(&stream_id)
            .map_or(StreamState::Idle, Stream::state)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Highest stream id the peer has opened (GOAWAY's last-stream-id).
    pub fn last_peer_stream_id(&self) -> u32 {
        self.last_peer_id
    }

    /// Smallest unused id this endpoint may open next.
    pub fn next_local_stream_id(&self) -> u32 {
        match (self.role, self.last_local_id) {
            (Role::Client, 0) => 1,
            (Role::Server, 0) => 2,
            (_, last) => last + 2,
        }
    }

    /// Streams opened by the peer that are not yet closed.
    pub fn active_peer_streams(&self) -> usize {
        let peer = self.role.peer();
        self.streams
            .values()
            .filter(|s| peer.initiates(s.id))
            .filter(|s| {
                matches!(
                    s.state,
                    StreamState::Open | StreamState::HalfClosedLocal | StreamState::HalfClosedRemote
                )
            })
            .count()
    }

    /// Force a stream closed after an RST_STREAM this endpoint sent in
    /// response to a stream error.
    pub fn close(&mut self, stream_id: u32) {
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.set_state(StreamState::Closed);
        }
    }

    /// Check a received frame against stream `stream_id` and advance it.
    pub fn recv(
        &mut self,
        stream_id: u32,
        frame_type: FrameType,
        end_stream: bool,
    ) -> Result<StreamState, H2Error> {
        if frame_type == FrameType::Headers && self.state(stream_id) == StreamState::Idle {
            self.check_new_id(stream_id, Direction::Recv)?;
        }
        self.advance(stream_id, Direction::Recv, frame_type, end_stream)
    }

    /// Check a frame the application wants to send and advance the stream.
    pub fn send(
        &mut self,
        stream_id: u32,
        frame_type: FrameType,
        end_stream: bool,
    ) -> Result<StreamState, H2Error> {
        if frame_type == FrameType::Headers && self.state(stream_id) == StreamState::Idle {
            self.check_new_id(stream_id, Direction::Send)?;
        }
        self.advance(stream_id, Direction::Send, frame_type, end_stream)
    }

    /// Run a frame through the stream's state machine. Streams that are
    /// still idle afterwards are not stored.
    fn advance(
        &mut self,
        stream_id: u32,
        direction: Direction,
        frame_type: FrameType,
        end_stream: bool,
    ) -> Result<StreamState, H2Error> {
        let grace = self.grace;
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            return stream.on_frame(direction, frame_type, end_stream, grace);
        }
        let mut stream = Stream::new(stream_id);
        let state = stream.on_frame(direction, frame_type, end_stream, grace)?;
        if state != StreamState::Idle {
            self.streams.insert(stream_id, stream);
        }
        Ok(state)
    }

    /// Reserve `promised_id` for a PUSH_PROMISE moving in `direction`.
    pub fn reserve(
        &mut self,
        promised_id: u32,
        direction: Direction,
    ) -> Result<StreamState, H2Error> {
        self.check_new_id(promised_id, direction)?;
        self.streams
            .entry(promised_id)
            .or_insert_with(|| Stream::new(promised_id))
            .on_reserve(direction)
    }

    /// Stream-id rules for a stream being opened or reserved: parity of the
    /// opening side and strictly increasing ids.
    fn check_new_id(&mut self, stream_id: u32, direction: Direction) -> Result<(), H2Error> {
        let opener = match direction {
            Direction::Send => self.role,
            Direction::Recv => self.role.peer(),
        };
        let last = match direction {
            Direction::Send => &mut self.last_local_id,
            Direction::Recv => &mut self.last_peer_id,
        };

        if self.strict_ids && (!opener.initiates(stream_id) || stream_id <= *last) {
            let reason =
                format!("stream id {stream_id} cannot be opened by the {opener:?} after {last}");
            return Err(match direction {
                Direction::Recv => H2Error::connection(ErrorCode::ProtocolError, reason),
                Direction::Send => H2Error::InvalidFrame(reason),
            });
        }
        *last = (*last).max(stream_id);
        Ok(())
    }
}
