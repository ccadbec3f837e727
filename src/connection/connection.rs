//! The connection state machine: frame reassembly and conformance.
//!
//! A connection is driven by a single logical task; parallelism lives
//! across connections, never within one, so none of the per-connection
//! state needs locking. Deadlines are the sole cancellation mechanism:
//! the `_timeout` variants bound each operation and surface expiry as an
//! I/O error.

use std::any::Any;
use std::io;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::config::Config;
use crate::connection::ConnectionState;
use crate::error::{Error, Result};
use crate::extensions::deflate::{deflate, inflate};
use crate::message::{CloseReason, Message};
use crate::protocol::{apply_mask_fast, Frame, OpCode, MAX_CONTROL_FRAME_PAYLOAD};

/// Everything the upgrader hands over for one accepted connection: the
/// hijacked transport and the negotiated compression flag.
#[derive(Debug)]
pub struct ConnectionContext<T> {
    /// The raw byte stream, already past the HTTP upgrade.
    pub io: T,
    /// Whether permessage-deflate was negotiated.
    pub compressed: bool,
}

/// A server-side WebSocket connection over an async byte stream.
///
/// Owns the transport handle and the read buffer, reassembles frames into
/// messages, and enforces protocol conformance: every violation is echoed
/// to the peer as a close frame with the matching code before the
/// transport is released.
///
/// Connections are built empty (state `Connecting`), initialized with a
/// fresh transport via [`init`](Connection::init), and recycled through
/// [`reset`](Connection::reset) when a manager returns them to its pool.
pub struct Connection<T> {
    io: Option<T>,
    read_buf: BytesMut,
    state: ConnectionState,
    compressed: bool,
    context: Option<Box<dyn Any + Send>>,
    last_message_at: Option<Instant>,
    pending: BytesMut,
    pending_opcode: Option<OpCode>,
    config: Config,
}

impl<T> Connection<T> {
    /// Create a connection without a transport, in state `Connecting`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            io: None,
            read_buf: BytesMut::with_capacity(config.read_buffer_size),
            state: ConnectionState::Connecting,
            compressed: false,
            context: None,
            last_message_at: None,
            pending: BytesMut::new(),
            pending_opcode: None,
            config,
        }
    }

    /// Install a fresh transport and open the connection.
    pub fn init(&mut self, ctx: ConnectionContext<T>) {
        self.io = Some(ctx.io);
        self.compressed = ctx.compressed;
        self.state = ConnectionState::Open;
    }

    /// Clear all per-connection state so the instance can go back on a
    /// pool. Buffers keep their capacity; everything else is zeroed.
    pub fn reset(&mut self) {
        self.io = None;
        self.compressed = false;
        self.context = None;
        self.last_message_at = None;
        self.pending_opcode = None;
        self.read_buf.clear();
        self.pending.clear();
        self.state = ConnectionState::Closed;
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the transport has been released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Whether permessage-deflate is active on this connection.
    #[must_use]
    pub fn compressed(&self) -> bool {
        self.compressed
    }

    /// When the last complete data message arrived.
    #[must_use]
    pub fn last_message_at(&self) -> Option<Instant> {
        self.last_message_at
    }

    /// Attach an opaque application value to this connection.
    pub fn set_context<V: Any + Send>(&mut self, value: V) {
        self.context = Some(Box::new(value));
    }

    /// Borrow the attached application value, if its type matches.
    #[must_use]
    pub fn context<V: Any>(&self) -> Option<&V> {
        self.context.as_deref().and_then(|value| value.downcast_ref())
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Connection<T> {
    /// Read one frame: fill the buffer until a frame decodes, enforce the
    /// masking rule, unmask in place, and inflate data payloads when the
    /// connection is compressed.
    ///
    /// Returns `(fin, opcode, payload)`. The fin flag is surfaced so the
    /// message loop can drive reassembly.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingMaskingKey`] after answering an unmasked client
    ///   frame with a 1002 close
    /// - [`Error::ProtocolViolation`] after answering unexpected reserved
    ///   bits with a 1002 close
    /// - [`Error::InvalidOpcode`] for opcodes outside the protocol set
    /// - [`Error::Io`] on transport failure or EOF mid-frame
    pub async fn read_packet(&mut self) -> Result<(bool, OpCode, Vec<u8>)> {
        let frame = self.next_frame().await?;

        if frame.rsv2 || frame.rsv3 || (frame.rsv1 && !self.compressed) {
            return self
                .fail(
                    CloseReason::ProtocolError,
                    Error::ProtocolViolation("reserved bits set without a negotiated extension".into()),
                )
                .await;
        }

        let Frame {
            fin,
            opcode,
            mask,
            mut payload,
            ..
        } = frame;

        match mask {
            Some(key) => apply_mask_fast(&mut payload, key),
            None => {
                if !self.config.accept_unmasked_frames {
                    return self
                        .fail(CloseReason::ProtocolError, Error::MissingMaskingKey)
                        .await;
                }
            }
        }

        if self.compressed && opcode != OpCode::Close {
            payload = inflate(&payload)?;
        }
        Ok((fin, opcode, payload))
    }

    /// Read complete messages, handling control frames along the way.
    ///
    /// Returns `Ok(Some(message))` for a complete data message and
    /// `Ok(None)` when the exchange was control-only: a ping answered, a
    /// pong observed outside fragmentation, or a close handshake finished.
    /// After a close the state is `Closed` and further calls return
    /// [`Error::ConnectionClosed`].
    ///
    /// Text payloads are validated as UTF-8 on the complete assembled
    /// message, never per fragment, since a multi-byte sequence may
    /// straddle a frame boundary.
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        loop {
            match self.state {
                ConnectionState::Closing => return Err(Error::ConnectionClosing),
                ConnectionState::Closed => return Err(Error::ConnectionClosed),
                _ => {}
            }

            let (fin, opcode, payload) = match self.read_packet().await {
                Ok(packet) => packet,
                Err(err @ Error::InvalidOpcode(_)) => {
                    return self.fail(CloseReason::ProtocolError, err).await;
                }
                Err(err) => return Err(err),
            };

            match opcode {
                OpCode::Ping | OpCode::Pong | OpCode::Close => {
                    if payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                        return self
                            .fail(
                                CloseReason::ProtocolError,
                                Error::ProtocolViolation(
                                    "control frame payload exceeds 125 bytes".into(),
                                ),
                            )
                            .await;
                    }
                    if !fin {
                        return self
                            .fail(
                                CloseReason::ProtocolError,
                                Error::ProtocolViolation("fragmented control frame".into()),
                            )
                            .await;
                    }
                    match opcode {
                        OpCode::Ping => {
                            if self.state.is_open() {
                                trace!(len = payload.len(), "ping received, echoing pong");
                                let timeout = self.config.pong_write_timeout;
                                if let Err(err) =
                                    self.write_packet_timeout(timeout, Frame::pong(payload)).await
                                {
                                    trace!(%err, "pong write failed");
                                }
                            }
                            if self.pending_opcode.is_some() {
                                continue;
                            }
                            return Ok(None);
                        }
                        OpCode::Pong => {
                            if self.pending_opcode.is_some() {
                                continue;
                            }
                            return Ok(None);
                        }
                        _ => return self.handle_close(payload).await,
                    }
                }
                OpCode::Text | OpCode::Binary => {
                    if self.pending_opcode.is_some() {
                        return self
                            .fail(
                                CloseReason::ProtocolError,
                                Error::ProtocolViolation("expected continuation frame".into()),
                            )
                            .await;
                    }
                    if let Err(err) = self.config.limits.check_message_size(payload.len()) {
                        return self.fail(CloseReason::MessageTooBig, err).await;
                    }
                    if fin {
                        return self.finish_message(opcode, payload).await;
                    }
                    self.pending_opcode = Some(opcode);
                    self.pending.extend_from_slice(&payload);
                }
                OpCode::Continuation => {
                    let Some(pending_opcode) = self.pending_opcode else {
                        return self
                            .fail(
                                CloseReason::ProtocolError,
                                Error::ProtocolViolation(
                                    "continuation frame without a pending message".into(),
                                ),
                            )
                            .await;
                    };
                    let assembled_len = self.pending.len() + payload.len();
                    if let Err(err) = self.config.limits.check_message_size(assembled_len) {
                        return self.fail(CloseReason::MessageTooBig, err).await;
                    }
                    self.pending.extend_from_slice(&payload);
                    if fin {
                        self.pending_opcode = None;
                        let payload = self.pending.split().to_vec();
                        return self.finish_message(pending_opcode, payload).await;
                    }
                }
            }
        }
    }

    /// [`read_message`](Connection::read_message) bounded by a deadline.
    ///
    /// Expiry surfaces as a timed-out I/O error, which aborts the caller's
    /// read loop.
    pub async fn read_message_timeout(&mut self, timeout: Duration) -> Result<Option<Message>> {
        match tokio::time::timeout(timeout, self.read_message()).await {
            Ok(result) => result,
            Err(_) => Err(deadline_expired()),
        }
    }

    /// Write a single-frame data message, `fin=true`, unmasked
    /// (server-to-client frames carry no masking key per RFC 6455).
    ///
    /// On a compressed connection the payload is deflated and RSV1 set.
    pub async fn write_message(&mut self, message: Message) -> Result<()> {
        match self.state {
            ConnectionState::Closing => return Err(Error::ConnectionClosing),
            ConnectionState::Closed => return Err(Error::ConnectionClosed),
            _ => {}
        }

        let (opcode, payload) = match message {
            Message::Text(text) => (OpCode::Text, text.into_bytes()),
            Message::Binary(data) => (OpCode::Binary, data),
        };
        let mut frame = Frame::new(true, opcode, payload);
        if self.compressed {
            frame.payload = deflate(&frame.payload)?;
            frame.rsv1 = true;
        }
        self.write_packet(frame).await
    }

    /// [`write_message`](Connection::write_message) bounded by a deadline.
    pub async fn write_message_timeout(
        &mut self,
        timeout: Duration,
        message: Message,
    ) -> Result<()> {
        match tokio::time::timeout(timeout, self.write_message(message)).await {
            Ok(result) => result,
            Err(_) => Err(deadline_expired()),
        }
    }

    /// Write a raw frame to the transport. Control frames go out
    /// uncompressed with RSV1 clear regardless of the connection mode.
    pub async fn write_packet(&mut self, frame: Frame) -> Result<()> {
        let bytes = frame.encode();
        let io = self.io.as_mut().ok_or(Error::ConnectionClosed)?;
        io.write_all(&bytes).await?;
        io.flush().await?;
        Ok(())
    }

    async fn write_packet_timeout(&mut self, timeout: Duration, frame: Frame) -> Result<()> {
        match tokio::time::timeout(timeout, self.write_packet(frame)).await {
            Ok(result) => result,
            Err(_) => Err(deadline_expired()),
        }
    }

    /// Send a normal close (1000) and enter the `Closing` state.
    pub async fn close(&mut self) -> Result<()> {
        self.close_with_reason(CloseReason::Normal).await
    }

    /// Send a close frame carrying `reason` as a 2-byte big-endian code
    /// and enter the `Closing` state.
    pub async fn close_with_reason(&mut self, reason: CloseReason) -> Result<()> {
        self.state = ConnectionState::Closing;
        self.write_packet(Frame::close(reason.as_u16())).await
    }

    /// Release the transport and enter the `Closed` state.
    ///
    /// Idempotent at the state level: repeated calls after `Closed` are
    /// no-ops.
    pub async fn terminate(&mut self) -> Result<()> {
        let Some(mut io) = self.io.take() else {
            self.state = ConnectionState::Closed;
            return Ok(());
        };
        self.state = ConnectionState::Closed;
        io.shutdown().await?;
        Ok(())
    }

    /// Fill the read buffer until one complete frame decodes.
    async fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if !self.read_buf.is_empty() {
                match Frame::decode(&self.read_buf) {
                    Ok((frame, consumed)) => {
                        self.read_buf.advance(consumed);
                        return Ok(frame);
                    }
                    Err(Error::UnexpectedEndOfPacket { .. }) => {}
                    Err(err) => return Err(err),
                }
            }

            self.read_buf.reserve(self.config.read_buffer_size);
            let io = self.io.as_mut().ok_or(Error::ConnectionClosed)?;
            let n = io.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "transport closed mid-stream",
                )));
            }
        }
    }

    /// Close handshake, receiving side.
    async fn handle_close(&mut self, payload: Vec<u8>) -> Result<Option<Message>> {
        match payload.len() {
            0 => {
                debug!("close frame without status code");
                if self.state.is_open() {
                    let _ = self.close().await;
                }
                self.terminate().await?;
                Ok(None)
            }
            // Close codes are 2 bytes; a 1-byte payload is malformed.
            1 => {
                self.fail(
                    CloseReason::ProtocolError,
                    Error::ProtocolViolation("close frame with one-byte payload".into()),
                )
                .await
            }
            _ => {
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                if !CloseReason::is_acceptable(code) {
                    return self
                        .fail(CloseReason::ProtocolError, Error::WrongClosingCode(code))
                        .await;
                }
                if std::str::from_utf8(&payload[2..]).is_err() {
                    return self
                        .fail(CloseReason::InconsistentType, Error::InvalidUtf8)
                        .await;
                }
                debug!(code, "close frame received");
                if self.state.is_open() {
                    let _ = self.close().await;
                }
                self.terminate().await?;
                Ok(None)
            }
        }
    }

    /// Finish a data message: validate text payloads as UTF-8 at the
    /// message boundary and stamp the arrival time.
    async fn finish_message(
        &mut self,
        opcode: OpCode,
        payload: Vec<u8>,
    ) -> Result<Option<Message>> {
        let message = match opcode {
            OpCode::Text => match String::from_utf8(payload) {
                Ok(text) => Message::Text(text),
                Err(_) => {
                    return self
                        .fail(CloseReason::InconsistentType, Error::InvalidUtf8)
                        .await;
                }
            },
            _ => Message::Binary(payload),
        };
        self.last_message_at = Some(Instant::now());
        Ok(Some(message))
    }

    /// Echo `reason` to the peer as a close frame, release the transport,
    /// and surface `err`. Write failures are ignored: the peer may already
    /// be gone, and the transport is being torn down either way.
    async fn fail<V>(&mut self, reason: CloseReason, err: Error) -> Result<V> {
        debug!(code = reason.as_u16(), %err, "closing on protocol failure");
        let _ = self.close_with_reason(reason).await;
        let _ = self.terminate().await;
        Err(err)
    }
}

fn deadline_expired() -> Error {
    Error::Io(io::Error::new(io::ErrorKind::TimedOut, "deadline expired"))
}
