//! One HTTP/2 connection on tokio.
//!
//! A [`Session`] performs the preface and SETTINGS handshake, then runs two
//! tasks over the split transport:
//!
//! - the reader decodes frames with [`H2Codec`], runs them through the stream
//!   state machine, answers SETTINGS and PING itself and hands every event to
//!   the [`Application`]
//! - the writer drains a bounded queue and writes frames one at a time, so
//!   producers never interleave partial frames on the wire
//!
//! HPACK state follows the same split: the reader owns the decoder and the
//! writer owns the encoder. Header lists are compressed by the writer as they
//! leave the queue, so encoder state always matches wire order.
//!
//! Stream errors are answered with RST_STREAM and the session keeps going.
//! Connection errors are answered with GOAWAY and end the session.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::config::SessionConfig;
use crate::error::{ErrorCode, H2Error};
use crate::frame::{Frame, FrameType, DEFAULT_MAX_FRAME_SIZE};
use crate::h2_codec::{
    is_h2c_preface, split_header_block, H2Codec, H2Event, HeaderBlockKind, CONNECTION_PREFACE,
};
use crate::hpack::{H2Header, HpackEncoder};
use crate::settings::Settings;
use crate::stream::{Direction, Role, StreamState, StreamTable};

const READ_BUF_SIZE: usize = 16 * 1024;

/// Receives the events of a session.
///
/// Called on the reader task, one event at a time and in wire order. Frames
/// given to the [`Outbox`] are queued as soon as they are accepted. An error return
/// is handled like a protocol error: a stream error resets that stream, any
/// other error ends the connection with GOAWAY.
pub trait Application: Send + 'static {
    fn on_event(&mut self, event: H2Event, outbox: &mut Outbox) -> Result<(), H2Error>;
}

impl<F> Application for F
where
    F: FnMut(H2Event, &mut Outbox) -> Result<(), H2Error> + Send + 'static,
{
    fn on_event(&mut self, event: H2Event, outbox: &mut Outbox) -> Result<(), H2Error> {
        self(event, outbox)
    }
}

/// Items on the outbound queue.
#[derive(Debug)]
enum Outbound {
    Frame(Frame),
    /// Header list to compress and send as HEADERS/PUSH_PROMISE + CONTINUATION.
    HeaderBlock {
        stream_id: u32,
        kind: HeaderBlockKind,
        headers: Vec<H2Header>,
    },
    /// The peer changed SETTINGS_HEADER_TABLE_SIZE.
    EncoderTableSize(usize),
    /// Flush and close the transport.
    Close,
}

#[derive(Debug)]
struct Shared {
    role: Role,
    streams: Mutex<StreamTable>,
    peer_settings: Mutex<Settings>,
    shutdown: watch::Sender<bool>,
}

/// Cloneable sender side of a session.
///
/// Every send is checked against the stream state machine before it is
/// queued; a frame the state forbids is refused with
/// [`H2Error::IllegalSend`] and never reaches the queue.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
    tx: mpsc::Sender<Outbound>,
}

impl SessionHandle {
    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Queue a frame, waiting for queue capacity.
    ///
    /// Header-bearing frames are refused here; use [`send_headers`],
    /// [`open_stream`] or [`push_promise`] so the session can compress them.
    ///
    /// [`send_headers`]: SessionHandle::send_headers
    /// [`open_stream`]: SessionHandle::open_stream
    /// [`push_promise`]: SessionHandle::push_promise
    pub async fn send(&self, frame: Frame) -> Result<(), H2Error> {
        let permit = self.tx.reserve().await.map_err(|_| H2Error::SessionClosed)?;
        let max_frame_size = self.peer_max_frame_size();
        let mut streams = self.shared.streams.lock();
        check_frame(&mut streams, &frame, max_frame_size)?;
        permit.send(Outbound::Frame(frame));
        Ok(())
    }

    /// Queue a frame without waiting; fails with [`H2Error::QueueFull`] when
    /// the queue has no room.
    pub fn try_send(&self, frame: Frame) -> Result<(), H2Error> {
        let permit = self.try_permit()?;
        let max_frame_size = self.peer_max_frame_size();
        let mut streams = self.shared.streams.lock();
        check_frame(&mut streams, &frame, max_frame_size)?;
        permit.send(Outbound::Frame(frame));
        Ok(())
    }

    /// Send a header list on an existing stream, or open `stream_id` with it.
    pub async fn send_headers(
        &self,
        stream_id: u32,
        headers: Vec<H2Header>,
        end_stream: bool,
    ) -> Result<(), H2Error> {
        let permit = self.tx.reserve().await.map_err(|_| H2Error::SessionClosed)?;
        let mut streams = self.shared.streams.lock();
        let item = headers_item(&mut streams, stream_id, headers, end_stream)?;
        permit.send(item);
        Ok(())
    }

    /// Open the next locally initiated stream with `headers`. Returns its id.
    pub async fn open_stream(
        &self,
        headers: Vec<H2Header>,
        end_stream: bool,
    ) -> Result<u32, H2Error> {
        let permit = self.tx.reserve().await.map_err(|_| H2Error::SessionClosed)?;
        let mut streams = self.shared.streams.lock();
        let stream_id = streams.next_local_stream_id();
        let item = headers_item(&mut streams, stream_id, headers, end_stream)?;
        permit.send(item);
        Ok(stream_id)
    }

    /// Promise a pushed response on `stream_id` (server only). Returns the
    /// reserved stream id.
    pub async fn push_promise(
        &self,
        stream_id: u32,
        headers: Vec<H2Header>,
    ) -> Result<u32, H2Error> {
        let permit = self.tx.reserve().await.map_err(|_| H2Error::SessionClosed)?;
        let push_enabled = self.shared.peer_settings.lock().enable_push;
        let mut streams = self.shared.streams.lock();
        let (promised, item) = push_item(&mut streams, push_enabled, stream_id, headers)?;
        permit.send(item);
        Ok(promised)
    }

    pub async fn ping(&self, data: [u8; 8]) -> Result<(), H2Error> {
        self.send(Frame::ping(data)).await
    }

    pub fn stream_state(&self, stream_id: u32) -> StreamState {
        self.shared.streams.lock().state(stream_id)
    }

    /// SETTINGS most recently received from the peer.
    pub fn peer_settings(&self) -> Settings {
        self.shared.peer_settings.lock().clone()
    }

    /// Stop both tasks. The writer flushes queued frames, sends
    /// GOAWAY(NO_ERROR) and closes the transport.
    pub fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shared.shutdown.borrow()
    }

    fn peer_max_frame_size(&self) -> u32 {
        self.shared.peer_settings.lock().max_frame_size
    }

    fn try_permit(&self) -> Result<mpsc::Permit<'_, Outbound>, H2Error> {
        self.tx.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => H2Error::QueueFull,
            TrySendError::Closed(()) => H2Error::SessionClosed,
        })
    }

    async fn enqueue(&self, item: Outbound) -> Result<(), H2Error> {
        self.tx.send(item).await.map_err(|_| H2Error::SessionClosed)
    }
}

fn check_frame(
    streams: &mut StreamTable,
    frame: &Frame,
    max_frame_size: u32,
) -> Result<(), H2Error> {
    match frame {
        Frame::Headers { .. } | Frame::PushPromise { .. } | Frame::Continuation { .. } => {
            return Err(H2Error::InvalidFrame(format!(
                "{} frames are built from header lists by the session",
                frame.frame_type()
            )));
        }
        Frame::Settings { .. } => {
            return Err(H2Error::InvalidFrame(
                "SETTINGS are exchanged by the session".into(),
            ));
        }
        _ => {}
    }

    let len = frame.payload_len();
    if len > max_frame_size as usize {
        return Err(H2Error::FrameTooLarge {
            len,
            max: max_frame_size,
        });
    }

    let stream_id = frame.stream_id();
    if stream_id != 0 {
        streams.send(stream_id, frame.frame_type(), frame.is_end_stream())?;
    }
    Ok(())
}

fn headers_item(
    streams: &mut StreamTable,
    stream_id: u32,
    headers: Vec<H2Header>,
    end_stream: bool,
) -> Result<Outbound, H2Error> {
    streams.send(stream_id, FrameType::Headers, end_stream)?;
    Ok(Outbound::HeaderBlock {
        stream_id,
        kind: HeaderBlockKind::Headers {
            end_stream,
            priority: None,
        },
        headers,
    })
}

fn push_item(
    streams: &mut StreamTable,
    push_enabled: bool,
    stream_id: u32,
    headers: Vec<H2Header>,
) -> Result<(u32, Outbound), H2Error> {
    if streams.role() != Role::Server || !push_enabled {
        return Err(H2Error::InvalidFrame(
            "PUSH_PROMISE needs the server role and ENABLE_PUSH from the peer".into(),
        ));
    }
    let promised_stream_id = streams.next_local_stream_id();
    streams.send(stream_id, FrameType::PushPromise, false)?;
    streams.reserve(promised_stream_id, Direction::Send)?;
    let item = Outbound::HeaderBlock {
        stream_id,
        kind: HeaderBlockKind::PushPromise { promised_stream_id },
        headers,
    };
    Ok((promised_stream_id, item))
}

/// Frames an [`Application`] wants sent in response to an event.
///
/// A frame is checked and queued in one step under the stream table lock,
/// as on [`SessionHandle`], so wire order is the order the stream states
/// advanced in. Nothing here waits: a full queue fails with
/// [`H2Error::QueueFull`].
#[derive(Debug)]
pub struct Outbox {
    handle: SessionHandle,
}

impl Outbox {
    fn new(handle: SessionHandle) -> Self {
        Self { handle }
    }

    pub fn send(&mut self, frame: Frame) -> Result<(), H2Error> {
        self.handle.try_send(frame)
    }

    pub fn send_headers(
        &mut self,
        stream_id: u32,
        headers: Vec<H2Header>,
        end_stream: bool,
    ) -> Result<(), H2Error> {
        let permit = self.handle.try_permit()?;
        let mut streams = self.handle.shared.streams.lock();
        let item = headers_item(&mut streams, stream_id, headers, end_stream)?;
        permit.send(item);
        Ok(())
    }

    pub fn push_promise(&mut self, stream_id: u32, headers: Vec<H2Header>) -> Result<u32, H2Error> {
        let permit = self.handle.try_permit()?;
        let push_enabled = self.handle.shared.peer_settings.lock().enable_push;
        let mut streams = self.handle.shared.streams.lock();
        let (promised, item) = push_item(&mut streams, push_enabled, stream_id, headers)?;
        permit.send(item);
        Ok(promised)
    }

    /// Handle for sending from other tasks later on.
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }
}

/// A running HTTP/2 connection.
#[derive(Debug)]
pub struct Session {
    handle: SessionHandle,
    reader: JoinHandle<Result<(), H2Error>>,
    writer: JoinHandle<Result<(), H2Error>>,
}

impl Session {
    /// Accept a connection: read and check the client preface, then send our
    /// SETTINGS.
    pub async fn server<T, A>(io: T, config: SessionConfig, app: A) -> Result<Self, H2Error>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
        A: Application,
    {
        config.validate()?;
        let (mut read_half, mut write_half) = tokio::io::split(io);

        let mut preface = [0u8; 24];
        read_half.read_exact(&mut preface).await?;
        if !is_h2c_preface(&preface) {
            warn!("invalid connection preface");
            let goaway = Frame::go_away(0, ErrorCode::ProtocolError, "invalid connection preface");
            let _ = write_half
                .write_all(&goaway.to_http_frame().to_bytes(DEFAULT_MAX_FRAME_SIZE)?)
                .await;
            return Err(H2Error::connection(
                ErrorCode::ProtocolError,
                "invalid connection preface",
            ));
        }

        Self::start(Role::Server, read_half, write_half, config, app).await
    }

    /// Open a connection: send the preface and our SETTINGS.
    pub async fn client<T, A>(io: T, config: SessionConfig, app: A) -> Result<Self, H2Error>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
        A: Application,
    {
        config.validate()?;
        let (read_half, mut write_half) = tokio::io::split(io);
        write_half.write_all(CONNECTION_PREFACE).await?;
        Self::start(Role::Client, read_half, write_half, config, app).await
    }

    async fn start<R, W, A>(
        role: Role,
        read_half: R,
        mut write_half: W,
        config: SessionConfig,
        app: A,
    ) -> Result<Self, H2Error>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        A: Application,
    {
        let local = config.local_settings();
        let settings = Frame::settings(local.to_entries());
        write_half
            .write_all(&settings.to_http_frame().to_bytes(DEFAULT_MAX_FRAME_SIZE)?)
            .await?;
        debug!(?role, "preface exchanged, SETTINGS sent");

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            role,
            streams: Mutex::new(StreamTable::new(
                role,
                config.strict_stream_ids,
                config.closed_stream_grace(),
            )),
            peer_settings: Mutex::new(Settings::default()),
            shutdown,
        });
        let handle = SessionHandle {
            shared: shared.clone(),
            tx,
        };

        let mut codec = H2Codec::new();
        codec.set_preface_received(true);
        codec.set_max_frame_size(config.max_frame_size);
        codec.set_header_table_size(config.header_table_size as usize);
        codec.set_max_header_block_size(config.max_header_block_size);

        let reader = Reader {
            codec,
            app,
            handle: handle.clone(),
            local,
            settings_seen: false,
        };
        let writer = Writer {
            encoder: HpackEncoder::with_huffman(config.huffman),
            shared: shared.clone(),
            buf: Vec::new(),
        };

        let reader = tokio::spawn(reader.run(read_half, shared.shutdown.subscribe()));
        let writer = tokio::spawn(writer.run(write_half, rx, shared.shutdown.subscribe()));

        Ok(Self {
            handle,
            reader,
            writer,
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn shutdown(&self) {
        self.handle.shutdown();
    }

    /// Wait for both tasks to finish. Returns the error that ended the
    /// connection, if any.
    pub async fn closed(self) -> Result<(), H2Error> {
        let read = self.reader.await.map_err(join_error)?;
        let write = self.writer.await.map_err(join_error)?;
        read.and(write)
    }
}

fn join_error(e: tokio::task::JoinError) -> H2Error {
    H2Error::Io(std::io::Error::other(e))
}

struct Reader<A> {
    codec: H2Codec,
    app: A,
    handle: SessionHandle,
    local: Settings,
    settings_seen: bool,
}

impl<A: Application> Reader<A> {
    async fn run<R: AsyncRead + Unpin>(
        mut self,
        mut io: R,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), H2Error> {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let result = loop {
            if let Err(e) = self.drain().await {
                break Err(e);
            }
            let n = tokio::select! {
                read = io.read(&mut buf) => match read {
                    Ok(n) => n,
                    Err(e) => {
                        error!(error = %e, "read failed");
                        break Err(e.into());
                    }
                },
                _ = shutdown.changed() => {
                    debug!("reader stopped by shutdown");
                    return Ok(());
                }
            };
            if n == 0 {
                debug!("peer closed the connection");
                break Ok(());
            }
            self.codec.feed(&buf[..n]);
        };

        let _ = self.handle.enqueue(Outbound::Close).await;
        result
    }

    /// Handle every complete frame in the codec buffer.
    async fn drain(&mut self) -> Result<(), H2Error> {
        loop {
            let outcome = match self.codec.next_frame() {
                Ok(None) => return Ok(()),
                Ok(Some(frame)) => self.on_frame(frame).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                self.on_error(e).await?;
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> Result<(), H2Error> {
        trace!(stream_id = frame.stream_id(), frame_type = %frame.frame_type(), "frame received");

        if !self.settings_seen {
            if !matches!(frame, Frame::Settings { ack: false, .. }) {
                return Err(H2Error::connection(
                    ErrorCode::ProtocolError,
                    format!("first frame must be SETTINGS, got {}", frame.frame_type()),
                ));
            }
            self.settings_seen = true;
        }

        self.codec.check_header_block_sequence(&frame)?;
        if let Err(err) = self.check_stream_state(&frame) {
            if !err.is_connection_error()
                && matches!(
                    frame.frame_type(),
                    FrameType::Headers | FrameType::PushPromise | FrameType::Continuation
                )
            {
                // The block still has to pass through the decoder to keep
                // the HPACK tables in step.
                self.codec.assemble(frame)?;
            }
            return Err(err);
        }

        let Some(event) = self.codec.assemble(frame)? else {
            return Ok(());
        };
        self.on_connection_event(&event).await?;

        let mut outbox = Outbox::new(self.handle.clone());
        self.app.on_event(event, &mut outbox)
    }

    fn check_stream_state(&self, frame: &Frame) -> Result<(), H2Error> {
        let stream_id = frame.stream_id();
        if stream_id == 0 {
            return Ok(());
        }
        let mut streams = self.handle.shared.streams.lock();

        match frame {
            Frame::Headers {
                end_stream,
                end_headers,
                ..
            } => {
                let opening = streams.state(stream_id) == StreamState::Idle;
                streams.recv(stream_id, FrameType::Headers, *end_stream && *end_headers)?;
                if let Some(max) = self.local.max_concurrent_streams {
                    if opening && streams.active_peer_streams() > max as usize {
                        return Err(H2Error::stream(
                            stream_id,
                            ErrorCode::RefusedStream,
                            format!("more than {max} concurrent streams"),
                        ));
                    }
                }
            }
            Frame::Continuation { end_headers, .. } => {
                let block_ends_stream = self.codec.pending_header_block().is_some_and(|(_, es)| es);
                streams.recv(
                    stream_id,
                    FrameType::Continuation,
                    *end_headers && block_ends_stream,
                )?;
            }
            Frame::PushPromise {
                promised_stream_id, ..
            } => {
                if streams.role() == Role::Server || !self.local.enable_push {
                    return Err(H2Error::connection(
                        ErrorCode::ProtocolError,
                        "PUSH_PROMISE not allowed on this connection",
                    ));
                }
                streams.recv(stream_id, FrameType::PushPromise, false)?;
                streams.reserve(*promised_stream_id, Direction::Recv)?;
            }
            other => {
                streams.recv(stream_id, other.frame_type(), other.is_end_stream())?;
            }
        }
        Ok(())
    }

    /// Work the session does itself before the application sees an event.
    async fn on_connection_event(&mut self, event: &H2Event) -> Result<(), H2Error> {
        match event {
            H2Event::Settings {
                ack: false,
                settings,
            } => {
                let table_size = {
                    let mut peer = self.handle.shared.peer_settings.lock();
                    let before = peer.header_table_size;
                    peer.apply(settings)?;
                    (peer.header_table_size != before).then_some(peer.header_table_size)
                };
                debug!(?settings, "peer SETTINGS applied");
                if let Some(size) = table_size {
                    self.handle
                        .enqueue(Outbound::EncoderTableSize(size as usize))
                        .await?;
                }
                self.handle
                    .enqueue(Outbound::Frame(Frame::settings_ack()))
                    .await?;
            }
            H2Event::Settings { ack: true, .. } => debug!("SETTINGS acknowledged"),
            H2Event::Ping { ack: false, data } => {
                trace!("answering PING");
                self.handle
                    .enqueue(Outbound::Frame(Frame::ping_ack(*data)))
                    .await?;
            }
            H2Event::GoAway {
                last_stream_id,
                error_code,
                ..
            } => debug!(last_stream_id, %error_code, "peer sent GOAWAY"),
            _ => {}
        }
        Ok(())
    }

    /// Answer an error on the wire. Returns `Err` when the connection is over.
    async fn on_error(&mut self, err: H2Error) -> Result<(), H2Error> {
        match err {
            H2Error::Stream {
                stream_id,
                code,
                ref reason,
            } => {
                warn!(stream_id, %code, %reason, "stream error, sending RST_STREAM");
                self.handle.shared.streams.lock().close(stream_id);
                self.handle
                    .enqueue(Outbound::Frame(Frame::rst_stream(stream_id, code)))
                    .await
            }
            H2Error::Io(_) | H2Error::SessionClosed => Err(err),
            err => {
                let code = err.code();
                warn!(%code, error = %err, "connection error, sending GOAWAY");
                let last_stream_id = self.handle.shared.streams.lock().last_peer_stream_id();
                let goaway = Frame::go_away(last_stream_id, code, err.to_string());
                self.handle.enqueue(Outbound::Frame(goaway)).await?;
                Err(err)
            }
        }
    }
}

struct Writer {
    encoder: HpackEncoder,
    shared: Arc<Shared>,
    buf: Vec<u8>,
}

impl Writer {
    async fn run<W: AsyncWrite + Unpin>(
        mut self,
        mut io: W,
        rx: mpsc::Receiver<Outbound>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), H2Error> {
        let result = self.write_loop(&mut io, rx, shutdown).await;
        if let Err(e) = &result {
            error!(error = %e, "writer failed");
            // Stop the reader too; nothing it queues can be sent any more.
            self.shared.shutdown.send_replace(true);
        }
        result
    }

    async fn write_loop<W: AsyncWrite + Unpin>(
        &mut self,
        io: &mut W,
        mut rx: mpsc::Receiver<Outbound>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), H2Error> {
        loop {
            let item = tokio::select! {
                biased;
                item = rx.recv() => item,
                _ = shutdown.changed() => {
                    let last_stream_id = self.shared.streams.lock().last_peer_stream_id();
                    debug!(last_stream_id, "shutdown, sending GOAWAY");
                    let goaway =
                        Frame::go_away(last_stream_id, ErrorCode::NoError, Vec::<u8>::new());
                    self.put(&goaway)?;
                    io.write_all(&self.buf).await?;
                    io.shutdown().await?;
                    return Ok(());
                }
            };

            match item {
                None | Some(Outbound::Close) => {
                    debug!("writer closing transport");
                    io.flush().await?;
                    let _ = io.shutdown().await;
                    return Ok(());
                }
                Some(Outbound::EncoderTableSize(size)) => {
                    self.encoder.set_max_table_size(size);
                    continue;
                }
                Some(Outbound::Frame(frame)) => self.put(&frame)?,
                Some(Outbound::HeaderBlock {
                    stream_id,
                    kind,
                    headers,
                }) => {
                    let block = self.encoder.encode_header_list(&headers);
                    let max_frame_size = self.shared.peer_settings.lock().max_frame_size;
                    for frame in split_header_block(stream_id, kind, block, max_frame_size) {
                        self.put(&frame)?;
                    }
                }
            }

            io.write_all(&self.buf).await?;
            self.buf.clear();
        }
    }

    fn put(&mut self, frame: &Frame) -> Result<(), H2Error> {
        let max_frame_size = self.shared.peer_settings.lock().max_frame_size;
        trace!(stream_id = frame.stream_id(), frame_type = %frame.frame_type(), "frame sent");
        frame.encode(max_frame_size, &mut self.buf)
    }
}
