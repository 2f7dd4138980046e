//! Error hierarchy for transports, codecs, and connections.

use thiserror::Error;

use crate::frame::FrameKind;

/// Errors surfaced by a framed transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed the link cleanly (normal or going-away close).
    #[error("connection closed by peer")]
    ClosedNormally,

    /// The link died without a clean close handshake.
    #[error("connection closed abnormally (code {code:?}): {reason}")]
    ClosedAbnormally {
        /// Close code, when the peer sent one.
        code: Option<u16>,
        /// Close reason or a local description of the failure.
        reason: String,
    },

    /// The read deadline elapsed before a frame arrived.
    #[error("read deadline exceeded")]
    DeadlineExceeded,

    /// Underlying socket failure.
    #[error("transport i/o: {0}")]
    Io(String),

    /// A frame that cannot be represented on the wire (e.g. non-UTF-8 text).
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

impl TransportError {
    /// Whether this error represents any form of peer disconnect.
    pub fn is_close(&self) -> bool {
        matches!(
            self,
            Self::ClosedNormally | Self::ClosedAbnormally { .. }
        )
    }
}

/// Errors produced while encoding or decoding application payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON (de)serialization failure.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary (de)serialization failure.
    #[error("binary: {0}")]
    Binary(#[from] bincode::Error),

    /// The frame kind does not match what the codec expects.
    #[error("unexpected {got:?} frame (expected {expected:?})")]
    UnexpectedFrameKind {
        /// Frame kind the codec handles.
        expected: FrameKind,
        /// Frame kind that arrived.
        got: FrameKind,
    },
}

/// Connection-level error handed to `on_error` and returned by send helpers.
#[derive(Debug, Error)]
pub enum ConnError {
    /// The transport failed or the peer went away.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A payload could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A handler-reported failure.
    #[error("{0}")]
    Handler(String),

    /// The serialized writer has stopped; nothing more can be sent.
    #[error("writer closed")]
    WriterClosed,
}
