//! Transport frame model.

/// The two WebSocket data frame flavors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// UTF-8 text frame.
    Text,
    /// Binary frame.
    Binary,
}

/// A single framed message as read from or written to the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Text or binary.
    pub kind: FrameKind,
    /// Raw payload bytes. For `Text` frames this is valid UTF-8.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a text frame.
    pub fn text(payload: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Text,
            payload,
        }
    }

    /// Build a binary frame.
    pub fn binary(payload: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Binary,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_constructor() {
        let frame = Frame::text(b"hello".to_vec());
        assert_eq!(frame.kind, FrameKind::Text);
        assert_eq!(frame.payload, b"hello");
    }

    #[test]
    fn binary_constructor() {
        let frame = Frame::binary(vec![0, 1, 2]);
        assert_eq!(frame.kind, FrameKind::Binary);
        assert_eq!(frame.payload, vec![0, 1, 2]);
    }

    #[test]
    fn kinds_are_distinct() {
        assert_ne!(FrameKind::Text, FrameKind::Binary);
    }
}
