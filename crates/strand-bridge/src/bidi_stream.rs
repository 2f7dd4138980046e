//! Bidirectional streaming bridge: both sides stream concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use strand_core::errors::ConnError;
use strand_conn::handler::ConnHandler;
use strand_conn::upgrade::{Accepted, Acceptor, Reject, UpgradeContext};
use strand_conn::writer::SerializedWriter;

use crate::core::{spawn_forwarder, BridgeCore};
use crate::envelope::{decode_data, Envelope, EnvelopeCodec};
use crate::stream::{StreamRecv, StreamSend, UpstreamError};

/// One bidirectional streaming connection.
///
/// The upstream handle is split at creation: the receive half feeds the
/// forwarder task, the send half stays with the handler for inbound data and
/// half-close. `stream_end` reaches the peer only when the upstream receive
/// side finishes cleanly. After a peer cancel the close notification is the
/// only signal.
pub struct BidiStreamConn<S: StreamSend, R: StreamRecv> {
    core: BridgeCore,
    sender: S,
    receiver: Option<R>,
    forwarder: Option<JoinHandle<()>>,
}

impl<S: StreamSend, R: StreamRecv> BidiStreamConn<S, R> {
    /// Wrap a split upstream handle bound to the given token.
    pub fn new(sender: S, receiver: R, cancel: CancellationToken) -> Self {
        Self {
            core: BridgeCore::new("bidi_stream", cancel),
            sender,
            receiver: Some(receiver),
            forwarder: None,
        }
    }

    /// The cancellation token observed by the upstream.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.core.cancel
    }
}

#[async_trait]
impl<S, R> ConnHandler for BidiStreamConn<S, R>
where
    S: StreamSend,
    S::Item: DeserializeOwned,
    R: StreamRecv,
    R::Item: Serialize,
{
    type In = Envelope;
    type Out = Envelope;

    async fn on_start(&mut self, writer: Arc<SerializedWriter<Envelope>>) -> Result<(), ConnError> {
        self.core.base.install(Arc::clone(&writer));
        let receiver = self
            .receiver
            .take()
            .ok_or_else(|| ConnError::Handler("stream already consumed".into()))?;
        self.forwarder = Some(spawn_forwarder(
            receiver,
            writer,
            self.core.cancel.clone(),
            Arc::clone(&self.core.metrics),
        ));
        Ok(())
    }

    async fn handle_message(&mut self, msg: Envelope) -> Result<(), ConnError> {
        match msg {
            Envelope::Data { data } => {
                let item: S::Item = match decode_data(data) {
                    Ok(item) => item,
                    Err(err) => {
                        self.core.send_error(err.to_string()).await;
                        return Ok(());
                    }
                };
                if let Err(err) = self.sender.send(item).await {
                    self.core.send_error(err.to_string()).await;
                    return Err(ConnError::Handler(err.to_string()));
                }
                let _ = self.core.metrics.inc_received();
            }
            Envelope::EndSend => {
                // Half-close: the forwarder keeps running until the upstream
                // receive side finishes.
                if let Err(err) = self.sender.close_send().await {
                    self.core.send_error(err.to_string()).await;
                    return Err(ConnError::Handler(err.to_string()));
                }
                debug!("peer half-closed its send side");
            }
            Envelope::Pong { ping_id } => {
                debug!(ping_id, "pong received");
            }
            Envelope::Cancel => {
                info!("peer cancelled stream");
                self.core.cancel.cancel();
            }
            other => {
                debug!(?other, "ignoring frame on a bidi connection");
            }
        }
        Ok(())
    }

    async fn on_close(&mut self) {
        self.core.cancel.cancel();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        info!(
            sent = self.core.metrics.sent(),
            received = self.core.metrics.received(),
            "bidi connection closed"
        );
    }

    async fn send_ping(&mut self) -> Result<(), ConnError> {
        self.core.base.send_ping().await
    }

    fn name(&self) -> &str {
        self.core.base.name()
    }

    fn connection_id(&self) -> &str {
        self.core.base.connection_id()
    }
}

/// Builds the split upstream handle for a bidi endpoint. The upgrade request
/// is available for routing and authorization metadata.
#[async_trait]
pub trait BidiStreamFactory: Send + Sync + 'static {
    /// Send half type.
    type Sender: StreamSend;
    /// Receive half type.
    type Receiver: StreamRecv;

    /// Open the upstream stream. Failures refuse the upgrade with 500.
    async fn create_stream(
        &self,
        ctx: &UpgradeContext,
        cancel: CancellationToken,
    ) -> Result<(Self::Sender, Self::Receiver), UpstreamError>;
}

/// Adapts a [`BidiStreamFactory`] to the upgrade surface.
pub struct BidiStreamAcceptor<F> {
    factory: F,
}

impl<F> BidiStreamAcceptor<F> {
    /// Wrap a factory.
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl<F> Acceptor for BidiStreamAcceptor<F>
where
    F: BidiStreamFactory,
    <F::Sender as StreamSend>::Item: DeserializeOwned,
    <F::Receiver as StreamRecv>::Item: Serialize,
{
    type Handler = BidiStreamConn<F::Sender, F::Receiver>;

    async fn accept(&self, ctx: &UpgradeContext) -> Result<Accepted<Self::Handler>, Reject> {
        let cancel = CancellationToken::new();
        let (sender, receiver) = self
            .factory
            .create_stream(ctx, cancel.clone())
            .await
            .map_err(|err| {
                warn!(error = %err, "stream creation failed");
                Reject::internal(err.to_string())
            })?;

        Ok(Accepted {
            handler: BidiStreamConn::new(sender, receiver, cancel),
            codec: Arc::new(EnvelopeCodec),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::ChannelSender;
    use serde_json::{json, Value};
    use strand_core::errors::TransportError;
    use strand_core::frame::{Frame, FrameKind};
    use strand_conn::transport::FrameWrite;
    use tokio::sync::mpsc;

    struct RecordingWrite {
        tx: mpsc::UnboundedSender<Frame>,
    }

    #[async_trait]
    impl FrameWrite for RecordingWrite {
        async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
            self.tx
                .send(frame)
                .map_err(|_| TransportError::Io("sink gone".into()))
        }
        async fn close(&mut self) {}
    }

    type TestConn = BidiStreamConn<ChannelSender<Value>, mpsc::Receiver<Result<Value, UpstreamError>>>;

    async fn started_conn() -> (
        TestConn,
        mpsc::Receiver<Value>,
        mpsc::Sender<Result<Value, UpstreamError>>,
        Arc<SerializedWriter<Envelope>>,
        mpsc::UnboundedReceiver<Frame>,
    ) {
        let (up_tx, up_rx) = mpsc::channel::<Value>(8);
        let (down_tx, down_rx) = mpsc::channel::<Result<Value, UpstreamError>>(8);
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let writer = Arc::new(SerializedWriter::spawn(
            RecordingWrite { tx: frame_tx },
            |msg: &Envelope| Ok((serde_json::to_vec(msg)?, FrameKind::Text)),
            16,
        ));
        let mut conn = BidiStreamConn::new(
            ChannelSender::new(up_tx),
            down_rx,
            CancellationToken::new(),
        );
        conn.on_start(Arc::clone(&writer)).await.unwrap();
        (conn, up_rx, down_tx, writer, frame_rx)
    }

    async fn drain(
        writer: Arc<SerializedWriter<Envelope>>,
        rx: &mut mpsc::UnboundedReceiver<Frame>,
    ) -> Vec<Value> {
        writer.stop().await;
        let mut values = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            values.push(serde_json::from_slice(&frame.payload).unwrap());
        }
        values
    }

    #[tokio::test]
    async fn data_flows_upstream() {
        let (mut conn, mut up_rx, _down_tx, _writer, _frames) = started_conn().await;

        conn.handle_message(Envelope::Data {
            data: json!({"move": {"x": 1, "y": 1}}),
        })
        .await
        .unwrap();

        assert_eq!(up_rx.recv().await.unwrap()["move"]["x"], 1);
    }

    #[tokio::test]
    async fn upstream_responses_flow_down() {
        let (mut conn, _up_rx, down_tx, writer, mut frames) = started_conn().await;

        down_tx.send(Ok(json!({"stateId": "s1"}))).await.unwrap();
        drop(down_tx);

        // Wait for the forwarder to drain and emit stream_end.
        if let Some(forwarder) = conn.forwarder.take() {
            forwarder.await.unwrap();
        }
        let values = drain(writer, &mut frames).await;
        assert_eq!(values[0]["type"], "data");
        assert_eq!(values[0]["data"]["stateId"], "s1");
        assert_eq!(values[1]["type"], "stream_end");
    }

    #[tokio::test]
    async fn end_send_half_closes_only() {
        let (mut conn, mut up_rx, down_tx, writer, mut frames) = started_conn().await;

        conn.handle_message(Envelope::EndSend).await.unwrap();
        // Upstream sees EOF on its inbound side.
        assert_eq!(up_rx.recv().await, None);

        // The receive side still flows.
        down_tx.send(Ok(json!({"late": true}))).await.unwrap();
        drop(down_tx);
        if let Some(forwarder) = conn.forwarder.take() {
            forwarder.await.unwrap();
        }
        let values = drain(writer, &mut frames).await;
        assert_eq!(values[0]["data"]["late"], true);
        assert_eq!(values[1]["type"], "stream_end");
    }

    #[tokio::test]
    async fn cancel_silences_forwarder() {
        let (mut conn, _up_rx, down_tx, writer, mut frames) = started_conn().await;
        let token = conn.cancel_token().clone();

        conn.handle_message(Envelope::Cancel).await.unwrap();
        assert!(token.is_cancelled());

        // Upstream notices the cancel and fails its receive side.
        down_tx.send(Err(UpstreamError::Cancelled)).await.unwrap();
        if let Some(forwarder) = conn.forwarder.take() {
            forwarder.await.unwrap();
        }
        let values = drain(writer, &mut frames).await;
        assert!(
            values.is_empty(),
            "no terminal envelope may follow a peer cancel"
        );
    }

    #[tokio::test]
    async fn send_after_half_close_reports_error() {
        let (mut conn, _up_rx, _down_tx, writer, mut frames) = started_conn().await;

        conn.handle_message(Envelope::EndSend).await.unwrap();
        let err = conn
            .handle_message(Envelope::Data {
                data: json!({"x": 1}),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConnError::Handler(_)));

        let values = drain(writer, &mut frames).await;
        assert_eq!(values[0]["type"], "error");
    }

    #[tokio::test]
    async fn acceptor_builds_connection() {
        struct EchoFactory;

        #[async_trait]
        impl BidiStreamFactory for EchoFactory {
            type Sender = ChannelSender<Value>;
            type Receiver = mpsc::Receiver<Result<Value, UpstreamError>>;

            async fn create_stream(
                &self,
                _ctx: &UpgradeContext,
                _cancel: CancellationToken,
            ) -> Result<(Self::Sender, Self::Receiver), UpstreamError> {
                let (tx, _rx) = mpsc::channel(4);
                let (_down_tx, down_rx) = mpsc::channel(4);
                Ok((ChannelSender::new(tx), down_rx))
            }
        }

        let acceptor = BidiStreamAcceptor::new(EchoFactory);
        let ctx = UpgradeContext {
            uri: "/sync".parse().unwrap(),
            headers: axum::http::HeaderMap::new(),
        };
        let accepted = acceptor.accept(&ctx).await.unwrap();
        assert_eq!(accepted.handler.name(), "bidi_stream");
    }
}
