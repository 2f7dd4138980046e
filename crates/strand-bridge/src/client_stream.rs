//! Client-streaming bridge: the client pushes many messages, the upstream
//! answers once after half-close.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use strand_core::errors::ConnError;
use strand_conn::handler::ConnHandler;
use strand_conn::upgrade::{Accepted, Acceptor, Reject, UpgradeContext};
use strand_conn::writer::SerializedWriter;

use crate::core::BridgeCore;
use crate::envelope::{data_envelope, decode_data, Envelope, EnvelopeCodec};
use crate::stream::{ClientStream, UpstreamError};

/// One client-streaming connection.
///
/// There is no forwarder task: the upstream produces exactly one terminal
/// response, fetched when the client sends `end_send`.
pub struct ClientStreamConn<S: ClientStream> {
    core: BridgeCore,
    stream: S,
}

impl<S: ClientStream> ClientStreamConn<S> {
    /// Wrap an upstream client-stream handle bound to the given token.
    pub fn new(stream: S, cancel: CancellationToken) -> Self {
        Self {
            core: BridgeCore::new("client_stream", cancel),
            stream,
        }
    }

    /// The cancellation token observed by the upstream.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.core.cancel
    }
}

#[async_trait]
impl<S> ConnHandler for ClientStreamConn<S>
where
    S: ClientStream,
    S::Req: DeserializeOwned,
    S::Resp: Serialize,
{
    type In = Envelope;
    type Out = Envelope;

    async fn on_start(&mut self, writer: Arc<SerializedWriter<Envelope>>) -> Result<(), ConnError> {
        self.core.base.install(writer);
        Ok(())
    }

    async fn handle_message(&mut self, msg: Envelope) -> Result<(), ConnError> {
        match msg {
            Envelope::Data { data } => {
                let req: S::Req = match decode_data(data) {
                    Ok(req) => req,
                    Err(err) => {
                        // A malformed payload is the client's problem; report
                        // it and keep the stream alive.
                        self.core.send_error(err.to_string()).await;
                        return Ok(());
                    }
                };
                if let Err(err) = self.stream.send(req).await {
                    self.core.send_error(err.to_string()).await;
                    return Err(ConnError::Handler(err.to_string()));
                }
                let _ = self.core.metrics.inc_received();
            }
            Envelope::EndSend => {
                let resp = match self.stream.close_and_recv().await {
                    Ok(resp) => resp,
                    Err(err) => {
                        self.core.send_error(err.to_string()).await;
                        return Err(ConnError::Handler(err.to_string()));
                    }
                };
                let envelope = match data_envelope(&resp) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        self.core.send_error(err.to_string()).await;
                        return Err(ConnError::Handler(err.to_string()));
                    }
                };
                let _ = self.core.metrics.inc_sent();
                if self.core.base.send_output(envelope).await.is_err() {
                    return Err(ConnError::WriterClosed);
                }
                if self.core.base.send_output(Envelope::StreamEnd).await.is_err() {
                    return Err(ConnError::WriterClosed);
                }
            }
            Envelope::Pong { ping_id } => {
                debug!(ping_id, "pong received");
            }
            Envelope::Cancel => {
                info!("peer cancelled stream");
                self.core.cancel.cancel();
            }
            other => {
                debug!(?other, "ignoring frame on a client-streaming connection");
            }
        }
        Ok(())
    }

    async fn on_close(&mut self) {
        self.core.cancel.cancel();
        info!(
            received = self.core.metrics.received(),
            "client-streaming connection closed"
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

/// Builds the upstream handle for a client-streaming endpoint. The upgrade
/// request is available for routing and authorization metadata.
#[async_trait]
pub trait ClientStreamFactory: Send + Sync + 'static {
    /// Upstream handle type.
    type Stream: ClientStream;

    /// Open the upstream stream. Failures refuse the upgrade with 500.
    async fn create_stream(
        &self,
        ctx: &UpgradeContext,
        cancel: CancellationToken,
    ) -> Result<Self::Stream, UpstreamError>;
}

/// Adapts a [`ClientStreamFactory`] to the upgrade surface.
pub struct ClientStreamAcceptor<F> {
    factory: F,
}

impl<F> ClientStreamAcceptor<F> {
    /// Wrap a factory.
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl<F> Acceptor for ClientStreamAcceptor<F>
where
    F: ClientStreamFactory,
    <F::Stream as ClientStream>::Req: DeserializeOwned,
    <F::Stream as ClientStream>::Resp: Serialize,
{
    type Handler = ClientStreamConn<F::Stream>;

    async fn accept(&self, ctx: &UpgradeContext) -> Result<Accepted<Self::Handler>, Reject> {
        let cancel = CancellationToken::new();
        let stream = self
            .factory
            .create_stream(ctx, cancel.clone())
            .await
            .map_err(|err| {
                warn!(error = %err, "stream creation failed");
                Reject::internal(err.to_string())
            })?;

        Ok(Accepted {
            handler: ClientStreamConn::new(stream, cancel),
            codec: Arc::new(EnvelopeCodec),
        })
    }
}
