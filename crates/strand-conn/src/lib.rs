//! # strand-conn
//!
//! Long-lived framed message connections over WebSocket.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `transport` | Framed transport traits + the axum WebSocket implementation |
//! | `outbound` | The data / heartbeat / terminal union every write goes through |
//! | `writer` | Single-consumer serialized writer owning the transport write side |
//! | `handler` | Connection handler capability trait + `BaseConn` composition |
//! | `engine` | Lifecycle state machine: read loop, heartbeats, timeouts, shutdown |
//! | `config` | Per-connection tuning (heartbeat cadence, silence timeout, origins) |
//! | `upgrade` | Accept/reject surface and the axum upgrade route |
//! | `debug` | Lock-free debug snapshot of a live connection |

#![deny(unsafe_code)]

pub mod config;
pub mod debug;
pub mod engine;
pub mod handler;
pub mod outbound;
pub mod transport;
pub mod upgrade;
pub mod writer;

#[cfg(test)]
pub(crate) mod testutil;
