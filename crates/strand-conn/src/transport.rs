//! Framed transport abstraction and its axum WebSocket implementation.
//!
//! A transport splits into a read half (owned by the reader producer) and a
//! write half (owned by the serialized writer). Neither half is required to
//! be safe for concurrent use; single ownership per task is the contract.

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::time::{self, Instant};

use strand_core::errors::TransportError;
use strand_core::frame::{Frame, FrameKind};

/// Read side of a framed transport.
#[async_trait]
pub trait FrameRead: Send {
    /// Read the next data frame. Blocks until a frame arrives, the deadline
    /// passes, or the link dies.
    async fn read_frame(&mut self) -> Result<Frame, TransportError>;

    /// Set the absolute instant after which a pending read fails with
    /// [`TransportError::DeadlineExceeded`].
    fn set_read_deadline(&mut self, deadline: Instant);
}

/// Write side of a framed transport.
#[async_trait]
pub trait FrameWrite: Send {
    /// Write a single frame atomically.
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the write side. Idempotent.
    async fn close(&mut self);
}

/// A bidirectional framed link that can be split into independent halves.
pub trait FrameTransport: Send {
    /// Read half type.
    type Reader: FrameRead + 'static;
    /// Write half type.
    type Writer: FrameWrite + 'static;

    /// Split into (reader, writer) halves.
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Framed transport over an upgraded axum WebSocket.
pub struct WsTransport {
    socket: WebSocket,
}

impl WsTransport {
    /// Wrap an upgraded socket.
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl FrameTransport for WsTransport {
    type Reader = WsFrameReader;
    type Writer = WsFrameWriter;

    fn split(self) -> (WsFrameReader, WsFrameWriter) {
        let (sink, stream) = self.socket.split();
        (
            WsFrameReader {
                stream,
                deadline: None,
            },
            WsFrameWriter {
                sink,
                closed: false,
            },
        )
    }
}

/// Read half of a [`WsTransport`].
pub struct WsFrameReader {
    stream: SplitStream<WebSocket>,
    deadline: Option<Instant>,
}

#[async_trait]
impl FrameRead for WsFrameReader {
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            let next = match self.deadline {
                Some(deadline) => match time::timeout_at(deadline, self.stream.next()).await {
                    Ok(next) => next,
                    Err(_) => return Err(TransportError::DeadlineExceeded),
                },
                None => self.stream.next().await,
            };
            let message = match next {
                None => {
                    return Err(TransportError::ClosedAbnormally {
                        code: None,
                        reason: "connection reset".into(),
                    })
                }
                Some(Err(err)) => return Err(TransportError::Io(err.to_string())),
                Some(Ok(message)) => message,
            };
            match message {
                Message::Text(text) => return Ok(Frame::text(text.as_bytes().to_vec())),
                Message::Binary(data) => return Ok(Frame::binary(data.to_vec())),
                Message::Close(frame) => return Err(classify_close(frame)),
                // Protocol pings are answered by the socket itself; neither
                // counts as application traffic.
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    }

    fn set_read_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }
}

/// Write half of a [`WsTransport`].
pub struct WsFrameWriter {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameWrite for WsFrameWriter {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame.kind {
            FrameKind::Text => {
                let text = String::from_utf8(frame.payload)
                    .map_err(|err| TransportError::InvalidFrame(err.to_string()))?;
                Message::Text(text.into())
            }
            FrameKind::Binary => Message::Binary(frame.payload.into()),
        };
        self.sink
            .send(message)
            .await
            .map_err(|err| TransportError::Io(err.to_string()))
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.sink.send(Message::Close(None)).await;
            let _ = self.sink.close().await;
        }
    }
}

fn classify_close(frame: Option<CloseFrame>) -> TransportError {
    match frame {
        None => TransportError::ClosedNormally,
        Some(frame) if frame.code == close_code::NORMAL || frame.code == close_code::AWAY => {
            TransportError::ClosedNormally
        }
        Some(frame) => TransportError::ClosedAbnormally {
            code: Some(frame.code),
            reason: frame.reason.to_string(),
        },
    }
}
