//! Payload codecs: pure encode/decode between typed messages and frames.
//!
//! A codec knows nothing about the transport, heartbeats, or lifecycle. It is
//! shared read-only across connections, so implementations must be stateless
//! (or internally synchronized) and safe to call concurrently.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;

use crate::errors::CodecError;
use crate::frame::FrameKind;

/// Encode/decode contract between application payloads and transport frames.
///
/// `I` is the inbound (decoded) message type, `O` the outbound one. The codec
/// picks the frame kind per outgoing message; decode is told the kind as
/// received.
pub trait Codec<I, O>: Send + Sync {
    /// Decode raw frame bytes into a typed inbound message.
    fn decode(&self, data: &[u8], kind: FrameKind) -> Result<I, CodecError>;

    /// Encode a typed outbound message into bytes plus the frame kind to use.
    fn encode(&self, msg: &O) -> Result<(Vec<u8>, FrameKind), CodecError>;
}

/// Dynamic JSON codec: both directions are untyped [`serde_json::Value`]s.
///
/// Useful when the message structure is not known at compile time. Always
/// emits text frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec<Value, Value> for JsonCodec {
    fn decode(&self, data: &[u8], _kind: FrameKind) -> Result<Value, CodecError> {
        Ok(serde_json::from_slice(data)?)
    }

    fn encode(&self, msg: &Value) -> Result<(Vec<u8>, FrameKind), CodecError> {
        Ok((serde_json::to_vec(msg)?, FrameKind::Text))
    }
}

/// Strongly-typed JSON codec. Always emits text frames.
pub struct TypedJsonCodec<I, O> {
    _marker: PhantomData<fn() -> (I, O)>,
}

impl<I, O> TypedJsonCodec<I, O> {
    /// Create the codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<I, O> Default for TypedJsonCodec<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O> Codec<I, O> for TypedJsonCodec<I, O>
where
    I: DeserializeOwned,
    O: Serialize,
{
    fn decode(&self, data: &[u8], _kind: FrameKind) -> Result<I, CodecError> {
        Ok(serde_json::from_slice(data)?)
    }

    fn encode(&self, msg: &O) -> Result<(Vec<u8>, FrameKind), CodecError> {
        Ok((serde_json::to_vec(msg)?, FrameKind::Text))
    }
}

/// Strongly-typed binary codec for high-throughput payloads. Always emits
/// binary frames, and refuses to decode text frames.
pub struct BincodeCodec<I, O> {
    _marker: PhantomData<fn() -> (I, O)>,
}

impl<I, O> BincodeCodec<I, O> {
    /// Create the codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<I, O> Default for BincodeCodec<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O> Codec<I, O> for BincodeCodec<I, O>
where
    I: DeserializeOwned,
    O: Serialize,
{
    fn decode(&self, data: &[u8], kind: FrameKind) -> Result<I, CodecError> {
        if kind != FrameKind::Binary {
            return Err(CodecError::UnexpectedFrameKind {
                expected: FrameKind::Binary,
                got: kind,
            });
        }
        Ok(bincode::deserialize(data)?)
    }

    fn encode(&self, msg: &O) -> Result<(Vec<u8>, FrameKind), CodecError> {
        Ok((bincode::serialize(msg)?, FrameKind::Binary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Move {
        x: i32,
        y: i32,
    }

    #[test]
    fn json_codec_roundtrip() {
        let codec = JsonCodec;
        let value = json!({"cmd": "a", "n": 3});
        let (bytes, kind) = codec.encode(&value).unwrap();
        assert_eq!(kind, FrameKind::Text);
        let back = codec.decode(&bytes, kind).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn json_codec_rejects_garbage() {
        let codec = JsonCodec;
        assert!(codec.decode(b"{not json", FrameKind::Text).is_err());
    }

    #[test]
    fn typed_json_roundtrip() {
        let codec = TypedJsonCodec::<Move, Move>::new();
        let (bytes, kind) = codec.encode(&Move { x: 1, y: -2 }).unwrap();
        assert_eq!(kind, FrameKind::Text);
        let back = codec.decode(&bytes, kind).unwrap();
        assert_eq!(back, Move { x: 1, y: -2 });
    }

    #[test]
    fn typed_json_decode_error_on_shape_mismatch() {
        let codec = TypedJsonCodec::<Move, Move>::new();
        let err = codec.decode(br#"{"x": "one"}"#, FrameKind::Text);
        assert!(err.is_err());
    }

    #[test]
    fn bincode_roundtrip_is_binary() {
        let codec = BincodeCodec::<Move, Move>::new();
        let (bytes, kind) = codec.encode(&Move { x: 7, y: 9 }).unwrap();
        assert_eq!(kind, FrameKind::Binary);
        let back = codec.decode(&bytes, kind).unwrap();
        assert_eq!(back, Move { x: 7, y: 9 });
    }

    #[test]
    fn bincode_refuses_text_frames() {
        let codec = BincodeCodec::<Move, Move>::new();
        let err = codec.decode(b"{}", FrameKind::Text).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedFrameKind { .. }));
    }

    #[test]
    fn codecs_are_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<JsonCodec>();
        assert_send_sync::<TypedJsonCodec<Move, Move>>();
        assert_send_sync::<BincodeCodec<Move, Move>>();
    }
}
