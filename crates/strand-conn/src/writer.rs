//! Serialized writer: the single funnel to the transport write side.
//!
//! All producers (handler sends, heartbeat ticks, terminal errors) enqueue
//! [`Outbound`] values; one worker task drains the queue and writes frames in
//! enqueue order. The transport's write primitive is never invoked anywhere
//! else.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use strand_core::errors::{CodecError, ConnError};
use strand_core::frame::{Frame, FrameKind};

use crate::outbound::{Heartbeat, Outbound, Terminal};
use crate::transport::FrameWrite;

/// Single-consumer writer owning the transport write side.
///
/// `stop` is idempotent; the worker drains whatever is queued, closes the
/// write half, and exits. After a write or encode failure the worker stops
/// on its own and all subsequent sends fail with [`ConnError::WriterClosed`].
pub struct SerializedWriter<O> {
    tx: Mutex<Option<mpsc::Sender<Outbound<O>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl<O: Send + 'static> SerializedWriter<O> {
    /// Spawn the worker task over the given write half and encode function.
    pub fn spawn<W, E>(write: W, encode: E, capacity: usize) -> Self
    where
        W: FrameWrite + 'static,
        E: Fn(&O) -> Result<(Vec<u8>, FrameKind), CodecError> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity);
        let worker = tokio::spawn(drain(rx, write, encode));
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Outbound<O>>> {
        self.tx.lock().clone()
    }

    /// Enqueue an application payload, waiting for queue space.
    pub async fn send_data(&self, msg: O) -> Result<(), ConnError> {
        self.send(Outbound::Data(msg)).await
    }

    /// Enqueue an application payload without blocking.
    ///
    /// Returns `false` (and counts a drop) when the queue is full or the
    /// writer has stopped.
    pub fn try_send_data(&self, msg: O) -> bool {
        let Some(tx) = self.sender() else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        if tx.try_send(Outbound::Data(msg)).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Enqueue a heartbeat. Heartbeats are never dropped; this waits for
    /// queue space.
    pub async fn send_heartbeat(&self, heartbeat: Heartbeat) -> Result<(), ConnError> {
        self.send(Outbound::Heartbeat(heartbeat)).await
    }

    /// Enqueue a terminal notification. Never dropped.
    pub async fn send_terminal(&self, terminal: Terminal) -> Result<(), ConnError> {
        self.send(Outbound::Terminal(terminal)).await
    }

    async fn send(&self, item: Outbound<O>) -> Result<(), ConnError> {
        let Some(tx) = self.sender() else {
            return Err(ConnError::WriterClosed);
        };
        tx.send(item).await.map_err(|_| ConnError::WriterClosed)
    }

    /// Stop the writer: close the queue, wait for the worker to drain and
    /// close the write half. Safe to call more than once.
    pub async fn stop(&self) {
        let tx = self.tx.lock().take();
        drop(tx);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    /// Resolves once the worker is gone (stopped or failed).
    pub async fn closed(&self) {
        match self.sender() {
            Some(tx) => tx.closed().await,
            None => {}
        }
    }

    /// Approximate number of queued items. Debug only.
    pub fn queue_depth(&self) -> usize {
        self.sender()
            .map_or(0, |tx| self.capacity.saturating_sub(tx.capacity()))
    }

    /// Payloads dropped by `try_send_data`.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn drain<O, W, E>(mut rx: mpsc::Receiver<Outbound<O>>, mut write: W, encode: E)
where
    W: FrameWrite,
    E: Fn(&O) -> Result<(Vec<u8>, FrameKind), CodecError>,
{
    while let Some(item) = rx.recv().await {
        let frame = match item {
            Outbound::Data(msg) => match encode(&msg) {
                Ok((payload, kind)) => Frame { kind, payload },
                Err(err) => {
                    warn!(error = %err, "encode failed, stopping writer");
                    break;
                }
            },
            Outbound::Heartbeat(heartbeat) => heartbeat_frame(&heartbeat),
            Outbound::Terminal(Terminal::EndOfStream) => {
                debug!("stream closed");
                continue;
            }
            Outbound::Terminal(Terminal::Error(message)) => error_frame(&message),
        };
        if let Err(err) = write.write_frame(frame).await {
            warn!(error = %err, "transport write failed, stopping writer");
            break;
        }
    }
    write.close().await;
}

// Heartbeats and errors are always JSON text regardless of the data codec, so
// the control channel stays readable even when payloads are binary.

fn heartbeat_frame(heartbeat: &Heartbeat) -> Frame {
    let msg = json!({
        "type": "ping",
        "pingId": heartbeat.ping_id,
        "connId": heartbeat.conn_id,
        "name": heartbeat.name,
    });
    Frame::text(serde_json::to_vec(&msg).unwrap_or_default())
}

fn error_frame(message: &str) -> Frame {
    let msg = json!({
        "type": "error",
        "error": message,
    });
    Frame::text(serde_json::to_vec(&msg).unwrap_or_default())
}
