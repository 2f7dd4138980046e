//! State and tasks shared by the three bridge connection shapes.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use strand_conn::handler::BaseConn;
use strand_conn::writer::SerializedWriter;

use crate::envelope::{data_envelope, Envelope};
use crate::metrics::StreamMetrics;
use crate::stream::StreamRecv;

/// Connection state every bridge shape carries: identity + heartbeat counter,
/// the upstream cancellation token, and the traffic counters.
pub(crate) struct BridgeCore {
    pub(crate) base: BaseConn<Envelope>,
    pub(crate) cancel: CancellationToken,
    pub(crate) metrics: Arc<StreamMetrics>,
}

impl BridgeCore {
    pub(crate) fn new(name: &str, cancel: CancellationToken) -> Self {
        Self {
            base: BaseConn::new(name),
            cancel,
            metrics: Arc::new(StreamMetrics::new()),
        }
    }

    /// Enqueue an error envelope; a gone writer only gets a log line because
    /// the connection is already tearing down at that point.
    pub(crate) async fn send_error(&self, message: impl Into<String> + Send) {
        let envelope = Envelope::Error {
            error: message.into(),
        };
        if self.base.send_output(envelope).await.is_err() {
            warn!("failed to enqueue error envelope, writer gone");
        }
    }
}

/// Pump the upstream receive side into outbound data envelopes.
///
/// Terminates with exactly one of:
/// - `stream_end` on clean end-of-stream,
/// - an `error` envelope on failure,
/// - silence, when the failure follows a cancellation.
pub(crate) fn spawn_forwarder<R>(
    mut stream: R,
    writer: Arc<SerializedWriter<Envelope>>,
    cancel: CancellationToken,
    metrics: Arc<StreamMetrics>,
) -> JoinHandle<()>
where
    R: StreamRecv,
    R::Item: Serialize,
{
    tokio::spawn(async move {
        loop {
            match stream.recv().await {
                Ok(Some(item)) => {
                    let envelope = match data_envelope(&item) {
                        Ok(envelope) => envelope,
                        Err(err) => {
                            let _ = writer
                                .send_data(Envelope::Error {
                                    error: err.to_string(),
                                })
                                .await;
                            break;
                        }
                    };
                    let _ = metrics.inc_sent();
                    if writer.send_data(envelope).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    let _ = writer.send_data(Envelope::StreamEnd).await;
                    break;
                }
                Err(_) if cancel.is_cancelled() => {
                    debug!("forwarder exiting after cancellation");
                    break;
                }
                Err(err) => {
                    let _ = writer
                        .send_data(Envelope::Error {
                            error: err.to_string(),
                        })
                        .await;
                    break;
                }
            }
        }
    })
}
