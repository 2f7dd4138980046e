//! The JSON control envelope and its codec.
//!
//! Every bridge frame is a single JSON object tagged by `type`, so a browser
//! client can `JSON.parse` the whole frame and dispatch uniformly. Typed
//! payloads are re-marshalled through a generic `serde_json::Value` tree
//! rather than embedded as raw bytes, which keeps the wire format one JSON
//! object at the cost of an extra encode/decode pass.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use strand_core::codec::Codec;
use strand_core::errors::CodecError;
use strand_core::frame::FrameKind;

/// One control envelope in either direction.
///
/// Server → client: `Data`, `Error`, `StreamEnd`, `Ping`.
/// Client → server: `Data`, `EndSend`, `Cancel`, `Pong`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Application payload as a JSON tree.
    Data {
        /// The payload.
        data: Value,
    },
    /// Upstream or bridge failure the peer should see.
    Error {
        /// Human-readable description.
        error: String,
    },
    /// The upstream stream finished cleanly; no more data will follow.
    StreamEnd,
    /// Server heartbeat.
    Ping {
        /// Monotonic per-connection sequence number.
        #[serde(rename = "pingId")]
        ping_id: i64,
        /// Connection id for correlation.
        #[serde(rename = "connId", default)]
        conn_id: String,
        /// Connection name.
        #[serde(default)]
        name: String,
    },
    /// Client heartbeat reply, echoing the ping id.
    Pong {
        /// Echoed sequence number.
        #[serde(rename = "pingId")]
        ping_id: i64,
    },
    /// Client aborts the upstream stream.
    Cancel,
    /// Client half-close: it will send no more data envelopes.
    EndSend,
    /// Any unrecognized `type`. Logged and ignored, never fatal.
    #[serde(other)]
    Unknown,
}

/// Codec for envelope connections. Always emits text frames; decode accepts
/// either kind since the payload is JSON regardless.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvelopeCodec;

impl Codec<Envelope, Envelope> for EnvelopeCodec {
    fn decode(&self, data: &[u8], _kind: FrameKind) -> Result<Envelope, CodecError> {
        Ok(serde_json::from_slice(data)?)
    }

    fn encode(&self, msg: &Envelope) -> Result<(Vec<u8>, FrameKind), CodecError> {
        Ok((serde_json::to_vec(msg)?, FrameKind::Text))
    }
}

/// Wrap a typed message in a data envelope via the generic JSON tree.
pub fn data_envelope<T: Serialize>(value: &T) -> Result<Envelope, CodecError> {
    Ok(Envelope::Data {
        data: serde_json::to_value(value)?,
    })
}

/// Rebuild a typed message from a data envelope's payload.
pub fn decode_data<T: DeserializeOwned>(data: Value) -> Result<T, CodecError> {
    Ok(serde_json::from_value(data)?)
}
