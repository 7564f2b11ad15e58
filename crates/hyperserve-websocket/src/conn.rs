//! WebSocket connection.
//!
//! [`Conn`] wraps a framed duplex stream. Exactly one reader and one writer
//! may operate concurrently: the read and write halves live behind separate
//! async mutexes. Control frames arriving between fragments are replied to
//! before application messages are yielded.

use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex as StdMutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex as TokioMutex;
use tokio::time::{Instant, timeout_at};
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::error::{WsError, WsResult};
use crate::protocol::{
    CLOSE_MESSAGE_TOO_BIG, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR, Frame, FrameCodec, Opcode,
};

/// Default cap on an assembled message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Write deadline for protocol-mandated control replies
const CONTROL_WRITE_DEADLINE: Duration = Duration::from_secs(1);

/// Ping handler: receives the ping payload, returns the pong payload to send
/// (`None` suppresses the reply). The default echoes the payload.
pub type PingHandler = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// Pong handler: observes pong payloads. The default is a no-op.
pub type PongHandler = Box<dyn FnMut(&[u8]) + Send>;

/// Close handler: receives the peer's code and reason. When set it replaces
/// the default matching-close reply.
pub type CloseHandler = Box<dyn FnMut(u16, &str) + Send>;

#[derive(Default)]
struct ControlHandlers {
    on_ping: Option<PingHandler>,
    on_pong: Option<PongHandler>,
    on_close: Option<CloseHandler>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseState {
    Open,
    Closing,
    Closed,
}

/// A WebSocket connection over any duplex stream
pub struct Conn<S> {
    reader: TokioMutex<SplitStream<Framed<S, FrameCodec>>>,
    writer: TokioMutex<SplitSink<Framed<S, FrameCodec>, Frame>>,
    state: StdMutex<CloseState>,
    handlers: StdMutex<ControlHandlers>,
    read_deadline: StdMutex<Option<Duration>>,
    max_message_size: usize,
}

impl<S> std::fmt::Debug for Conn<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("state", &*self.state.lock())
            .field("max_message_size", &self.max_message_size)
            .finish()
    }
}

impl<S> Conn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a server-side stream (inbound frames must be masked)
    pub fn server(stream: S, max_message_size: usize) -> Self {
        Self::with_codec(stream, FrameCodec::server(max_message_size), max_message_size)
    }

    /// Wrap a client-side stream (outbound frames are masked)
    pub fn client(stream: S, max_message_size: usize) -> Self {
        Self::with_codec(stream, FrameCodec::client(max_message_size), max_message_size)
    }

    fn with_codec(stream: S, codec: FrameCodec, max_message_size: usize) -> Self {
        let (writer, reader) = Framed::new(stream, codec).split();
        Self {
            reader: TokioMutex::new(reader),
            writer: TokioMutex::new(writer),
            state: StdMutex::new(CloseState::Open),
            handlers: StdMutex::new(ControlHandlers::default()),
            read_deadline: StdMutex::new(None),
            max_message_size,
        }
    }

    /// Set the per-`read_message` deadline
    pub fn set_read_deadline(&self, deadline: Option<Duration>) {
        *self.read_deadline.lock() = deadline;
    }

    /// Replace the ping handler
    pub fn set_ping_handler(&self, handler: PingHandler) {
        self.handlers.lock().on_ping = Some(handler);
    }

    /// Replace the pong handler
    pub fn set_pong_handler(&self, handler: PongHandler) {
        self.handlers.lock().on_pong = Some(handler);
    }

    /// Replace the close handler
    pub fn set_close_handler(&self, handler: CloseHandler) {
        self.handlers.lock().on_close = Some(handler);
    }

    /// Whether the connection is still open for application traffic
    pub fn is_open(&self) -> bool {
        *self.state.lock() == CloseState::Open
    }

    /// Read the next complete logical message.
    ///
    /// Continuation frames are coalesced; control frames arriving between
    /// fragments are handled inline. The accumulated payload is bounded by
    /// the connection's max message size: violations send a 1009 close and
    /// surface [`WsError::MessageTooBig`].
    pub async fn read_message(&self) -> WsResult<(Opcode, Bytes)> {
        if *self.state.lock() == CloseState::Closed {
            return Err(WsError::ConnectionClosed);
        }
        let deadline = self.read_deadline.lock().map(|d| Instant::now() + d);
        let mut reader = self.reader.lock().await;

        let mut message_opcode: Option<Opcode> = None;
        let mut assembled: Vec<u8> = Vec::new();

        loop {
            let next = match deadline {
                Some(at) => match timeout_at(at, reader.next()).await {
                    Ok(item) => item,
                    Err(_) => return Err(WsError::DeadlineExceeded),
                },
                None => reader.next().await,
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(WsError::Protocol(message))) => {
                    self.send_close_best_effort(CLOSE_PROTOCOL_ERROR, "protocol error")
                        .await;
                    return Err(WsError::Protocol(message));
                }
                Some(Err(e @ WsError::MessageTooBig { .. })) => {
                    self.send_close_best_effort(CLOSE_MESSAGE_TOO_BIG, "message too big")
                        .await;
                    return Err(e);
                }
                Some(Err(e)) => return Err(e),
                None => {
                    *self.state.lock() = CloseState::Closed;
                    return Err(WsError::ConnectionClosed);
                }
            };
            trace!(opcode = ?frame.opcode, fin = frame.fin, len = frame.payload.len(), "frame received");

            match frame.opcode {
                Opcode::Ping => {
                    let reply = {
                        let mut handlers = self.handlers.lock();
                        match handlers.on_ping.as_mut() {
                            Some(handler) => handler(&frame.payload),
                            None => Some(frame.payload.to_vec()),
                        }
                    };
                    if let Some(payload) = reply {
                        self.write_control(Frame::new(Opcode::Pong, payload)).await?;
                    }
                }
                Opcode::Pong => {
                    let mut handlers = self.handlers.lock();
                    if let Some(handler) = handlers.on_pong.as_mut() {
                        handler(&frame.payload);
                    }
                }
                Opcode::Close => {
                    let (code, reason) = Frame::parse_close(&frame.payload);
                    let custom = {
                        let mut handlers = self.handlers.lock();
                        match handlers.on_close.as_mut() {
                            Some(handler) => {
                                handler(code, &reason);
                                true
                            }
                            None => false,
                        }
                    };
                    if !custom {
                        self.send_close_best_effort(code, &reason).await;
                    }
                    *self.state.lock() = CloseState::Closed;
                    return Err(WsError::Closed { code, reason });
                }
                Opcode::Text | Opcode::Binary => {
                    if message_opcode.is_some() {
                        self.send_close_best_effort(CLOSE_PROTOCOL_ERROR, "protocol error")
                            .await;
                        return Err(WsError::Protocol(
                            "data frame while a fragmented message is in progress".into(),
                        ));
                    }
                    if frame.fin {
                        return Ok((frame.opcode, frame.payload));
                    }
                    message_opcode = Some(frame.opcode);
                    self.accumulate(&mut assembled, &frame.payload).await?;
                }
                Opcode::Continuation => {
                    let Some(opcode) = message_opcode else {
                        self.send_close_best_effort(CLOSE_PROTOCOL_ERROR, "protocol error")
                            .await;
                        return Err(WsError::Protocol(
                            "continuation frame without a message in progress".into(),
                        ));
                    };
                    self.accumulate(&mut assembled, &frame.payload).await?;
                    if frame.fin {
                        return Ok((opcode, Bytes::from(std::mem::take(&mut assembled))));
                    }
                }
            }
        }
    }

    async fn accumulate(&self, assembled: &mut Vec<u8>, payload: &[u8]) -> WsResult<()> {
        let next_len = assembled
            .len()
            .checked_add(payload.len())
            .ok_or_else(|| WsError::Protocol("message length overflow".into()))?;
        if next_len > self.max_message_size {
            self.send_close_best_effort(CLOSE_MESSAGE_TOO_BIG, "message too big")
                .await;
            return Err(WsError::MessageTooBig {
                size: next_len as u64,
                limit: self.max_message_size,
            });
        }
        assembled.extend_from_slice(payload);
        Ok(())
    }

    /// Send a complete message
    pub async fn write_message(&self, opcode: Opcode, payload: impl Into<Bytes>) -> WsResult<()> {
        if *self.state.lock() != CloseState::Open {
            return Err(WsError::ConnectionClosed);
        }
        let mut writer = self.writer.lock().await;
        writer.send(Frame::new(opcode, payload)).await
    }

    /// Send a text frame
    pub async fn write_text(&self, text: impl Into<String>) -> WsResult<()> {
        self.write_message(Opcode::Text, text.into().into_bytes())
            .await
    }

    /// Encode `value` and send it as a text frame
    pub async fn write_json<T: Serialize>(&self, value: &T) -> WsResult<()> {
        let encoded = serde_json::to_vec(value)?;
        self.write_message(Opcode::Text, encoded).await
    }

    /// Read the next text frame and decode it
    pub async fn read_json<T: DeserializeOwned>(&self) -> WsResult<T> {
        loop {
            let (opcode, payload) = self.read_message().await?;
            if opcode == Opcode::Text {
                return Ok(serde_json::from_slice(&payload)?);
            }
            debug!(opcode = ?opcode, "skipping non-text frame while reading JSON");
        }
    }

    /// Send a ping with a write deadline
    pub async fn ping(&self, payload: impl Into<Bytes>, deadline: Duration) -> WsResult<()> {
        let frame = Frame::new(Opcode::Ping, payload);
        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(deadline, writer.send(frame)).await {
            Ok(result) => result,
            Err(_) => Err(WsError::DeadlineExceeded),
        }
    }

    /// Send a close frame and stop accepting writes. Idempotent.
    pub async fn close(&self, code: u16, reason: &str) -> WsResult<()> {
        {
            let mut state = self.state.lock();
            if *state != CloseState::Open {
                return Ok(());
            }
            *state = CloseState::Closing;
        }
        let result = self.write_control(Frame::close(code, reason)).await;
        *self.state.lock() = CloseState::Closed;
        result
    }

    /// Close with code 1000
    pub async fn close_normal(&self) -> WsResult<()> {
        self.close(CLOSE_NORMAL, "").await
    }

    async fn write_control(&self, frame: Frame) -> WsResult<()> {
        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(CONTROL_WRITE_DEADLINE, writer.send(frame)).await {
            Ok(result) => result,
            Err(_) => Err(WsError::DeadlineExceeded),
        }
    }

    async fn send_close_best_effort(&self, code: u16, reason: &str) {
        {
            let mut state = self.state.lock();
            if *state == CloseState::Closed {
                return;
            }
            *state = CloseState::Closing;
        }
        if let Err(e) = self.write_control(Frame::close(code, reason)).await {
            debug!(error = %e, "failed to send close frame");
        }
        *self.state.lock() = CloseState::Closed;
    }
}
