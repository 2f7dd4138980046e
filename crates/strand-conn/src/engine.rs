//! Connection lifecycle engine.
//!
//! Drives a connection through `Pending → Open → Closing → Closed` on a
//! single controller task. The reader producer and serialized writer run as
//! independent tasks; everything reaches the controller through channels, so
//! state transitions are totally ordered.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use strand_core::codec::Codec;
use strand_core::errors::{CodecError, ConnError, TransportError};
use strand_core::frame::FrameKind;

use crate::config::ConnConfig;
use crate::handler::ConnHandler;
use crate::transport::{FrameRead, FrameTransport};
use crate::writer::SerializedWriter;

/// Lifecycle states of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    /// Created, transport not yet handed over.
    Pending,
    /// Live: reader, writer, and tickers running.
    Open,
    /// Tear-down in progress.
    Closing,
    /// Fully stopped.
    Closed,
}

/// Run one connection to completion.
///
/// Owns the whole lifecycle: installs the writer, calls `on_start`, runs the
/// select loop (heartbeats, silence timeout, inbound messages), and performs
/// the ordered tear-down. Returns when the connection is fully closed.
///
/// `shutdown` aborts the connection from outside (server shutdown, tests);
/// every connection also stops on peer close, handler error, or timeout.
#[instrument(skip_all, fields(name = %handler.name(), conn_id = %handler.connection_id()))]
pub async fn run_connection<T, H>(
    transport: T,
    mut handler: H,
    codec: Arc<dyn Codec<H::In, H::Out>>,
    config: ConnConfig,
    shutdown: CancellationToken,
) where
    T: FrameTransport,
    H: ConnHandler,
{
    let (read_half, write_half) = transport.split();
    let encode_codec = Arc::clone(&codec);
    let writer = Arc::new(SerializedWriter::spawn(
        write_half,
        move |msg: &H::Out| encode_codec.encode(msg),
        config.writer_capacity,
    ));

    // Pending → Open. A failed start never messages the peer.
    if let Err(err) = handler.on_start(Arc::clone(&writer)).await {
        warn!(error = %err, state = ?ConnState::Pending, "on_start failed, abandoning connection");
        handler.on_close().await;
        writer.stop().await;
        return;
    }
    let mut state = ConnState::Open;
    info!(?state, "connection open");

    let cancel = shutdown.child_token();
    let decode_codec = Arc::clone(&codec);
    let mut reader = spawn_reader(
        read_half,
        move |data: &[u8], kind| decode_codec.decode(data, kind),
        cancel.clone(),
        config.silence_timeout,
    );

    let mut ping_timer = time::interval_at(
        Instant::now() + config.ping_period,
        config.ping_period,
    );
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut timeout_timer = time::interval_at(
        Instant::now() + config.silence_timeout,
        config.silence_timeout,
    );
    timeout_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_read = Instant::now();

    // Open → Closing.
    loop {
        tokio::select! {
            _ = ping_timer.tick() => {
                if let Err(err) = handler.send_ping().await {
                    warn!(error = %err, "heartbeat enqueue failed, closing");
                    break;
                }
            }
            _ = timeout_timer.tick() => {
                let silent_for = last_read.elapsed();
                if silent_for > config.silence_timeout {
                    if handler.on_timeout() {
                        info!(silent_ms = silent_for.as_millis() as u64, "peer silent past deadline, closing");
                        break;
                    }
                    debug!("timeout suppressed by handler");
                }
            }
            () = writer.closed() => {
                warn!("writer stopped, closing");
                break;
            }
            () = shutdown.cancelled() => {
                info!("shutdown requested, closing");
                break;
            }
            result = reader.results.recv() => {
                let Some(item) = result else { break };
                last_read = Instant::now();
                match item {
                    Ok(msg) => {
                        if let Err(err) = handler.handle_message(msg).await {
                            if let Err(err) = handler.on_error(err).await {
                                warn!(error = %err, "handler error, closing");
                                break;
                            }
                        }
                    }
                    Err(ConnError::Transport(TransportError::ClosedNormally)) => {
                        debug!("peer closed connection");
                        break;
                    }
                    Err(err) => {
                        if let Err(err) = handler.on_error(err).await {
                            warn!(error = %err, "closing after error");
                            break;
                        }
                    }
                }
            }
        }
    }

    // Closing → Closed. Order matters: the handler cleans up first, then the
    // writer drains queued frames, then the reader is torn down.
    state = ConnState::Closing;
    debug!(?state, "tearing down");
    handler.on_close().await;
    writer.stop().await;
    cancel.cancel();
    reader.task.abort();
    state = ConnState::Closed;
    info!(?state, "connection closed");
}

struct ReaderHandle<I> {
    results: mpsc::Receiver<Result<I, ConnError>>,
    task: JoinHandle<()>,
}

/// Spawn the reader producer: the only task that touches the transport read
/// side. Decoded payloads and classified errors flow to the controller.
fn spawn_reader<R, I, D>(
    mut read: R,
    decode: D,
    cancel: CancellationToken,
    silence_timeout: Duration,
) -> ReaderHandle<I>
where
    R: FrameRead + 'static,
    I: Send + 'static,
    D: Fn(&[u8], FrameKind) -> Result<I, CodecError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(async move {
        loop {
            read.set_read_deadline(Instant::now() + silence_timeout);
            let result = tokio::select! {
                () = cancel.cancelled() => break,
                result = read.read_frame() => result,
            };
            match result {
                Ok(frame) => {
                    let decoded = decode(&frame.payload, frame.kind).map_err(ConnError::from);
                    if tx.send(decoded).await.is_err() {
                        break;
                    }
                }
                // The deadline only unblocks the read; the controller's
                // timeout ticker owns the close decision.
                Err(TransportError::DeadlineExceeded) => continue,
                Err(err) => {
                    let _ = tx.send(Err(ConnError::Transport(err))).await;
                    break;
                }
            }
        }
    });
    ReaderHandle { results: rx, task }
}
