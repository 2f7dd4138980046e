//! # strand-core
//!
//! Foundation types for the strand WebSocket streaming kit.
//!
//! - **Frames**: `FrameKind` / `Frame`, the text-vs-binary message model
//! - **Codecs**: the `Codec<I, O>` contract plus stock JSON and binary codecs
//! - **Errors**: `TransportError`, `CodecError`, `ConnError` via `thiserror`
//! - **IDs**: branded `ConnectionId` newtype (UUID v7, time-ordered)

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod frame;
pub mod ids;
