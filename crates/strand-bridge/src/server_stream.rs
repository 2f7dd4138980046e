//! Server-streaming bridge: the upstream pushes many messages, the client
//! receives them and may only send control frames back.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use strand_core::errors::ConnError;
use strand_conn::handler::ConnHandler;
use strand_conn::upgrade::{Accepted, Acceptor, Reject, UpgradeContext};
use strand_conn::writer::SerializedWriter;

use crate::core::{spawn_forwarder, BridgeCore};
use crate::envelope::{Envelope, EnvelopeCodec};
use crate::stream::{StreamRecv, UpstreamError};

/// One server-streaming connection.
///
/// On start it spawns a forwarder that pumps the upstream receive handle into
/// data envelopes. Inbound traffic is limited to `pong` and `cancel`;
/// anything else is logged and dropped, since the client is the receiver in
/// this shape.
pub struct ServerStreamConn<R: StreamRecv> {
    core: BridgeCore,
    stream: Option<R>,
    forwarder: Option<JoinHandle<()>>,
}

impl<R: StreamRecv> ServerStreamConn<R> {
    /// Wrap an upstream receive handle bound to the given token.
    pub fn new(stream: R, cancel: CancellationToken) -> Self {
        Self {
            core: BridgeCore::new("server_stream", cancel),
            stream: Some(stream),
            forwarder: None,
        }
    }

    /// The cancellation token observed by the upstream.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.core.cancel
    }
}

#[async_trait]
impl<R> ConnHandler for ServerStreamConn<R>
where
    R: StreamRecv,
    R::Item: Serialize,
{
    type In = Envelope;
    type Out = Envelope;

    async fn on_start(&mut self, writer: Arc<SerializedWriter<Envelope>>) -> Result<(), ConnError> {
        self.core.base.install(Arc::clone(&writer));
        let stream = self
            .stream
            .take()
            .ok_or_else(|| ConnError::Handler("stream already consumed".into()))?;
        self.forwarder = Some(spawn_forwarder(
            stream,
            writer,
            self.core.cancel.clone(),
            Arc::clone(&self.core.metrics),
        ));
        Ok(())
    }

    async fn handle_message(&mut self, msg: Envelope) -> Result<(), ConnError> {
        match msg {
            Envelope::Pong { ping_id } => {
                debug!(ping_id, "pong received");
            }
            Envelope::Cancel => {
                info!("peer cancelled stream");
                self.core.cancel.cancel();
            }
            other => {
                debug!(?other, "ignoring frame on a server-streaming connection");
            }
        }
        Ok(())
    }

    async fn on_close(&mut self) {
        self.core.cancel.cancel();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        info!(sent = self.core.metrics.sent(), "server-streaming connection closed");
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

/// Builds the upstream stream for a server-streaming endpoint.
///
/// `parse_request` sees the full upgrade request (path, query, headers), so
/// routing information never has to be smuggled through the first data frame.
#[async_trait]
pub trait ServerStreamFactory: Send + Sync + 'static {
    /// Parsed initial request type.
    type Req: Send;
    /// Upstream receive handle type.
    type Stream: StreamRecv;

    /// Extract the initial request from the upgrade. Failures refuse the
    /// upgrade with 400.
    fn parse_request(&self, ctx: &UpgradeContext) -> Result<Self::Req, String>;

    /// Open the upstream stream. Failures refuse the upgrade with 500. The
    /// token fires when the connection closes or the peer cancels.
    async fn create_stream(
        &self,
        req: Self::Req,
        cancel: CancellationToken,
    ) -> Result<Self::Stream, UpstreamError>;
}

/// Adapts a [`ServerStreamFactory`] to the upgrade surface.
pub struct ServerStreamAcceptor<F> {
    factory: F,
}

impl<F> ServerStreamAcceptor<F> {
    /// Wrap a factory.
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl<F> Acceptor for ServerStreamAcceptor<F>
where
    F: ServerStreamFactory,
    <F::Stream as StreamRecv>::Item: Serialize,
{
    type Handler = ServerStreamConn<F::Stream>;

    async fn accept(&self, ctx: &UpgradeContext) -> Result<Accepted<Self::Handler>, Reject> {
        let req = self.factory.parse_request(ctx).map_err(|message| {
            warn!(message, "request parse failed");
            Reject::bad_request(message)
        })?;

        let cancel = CancellationToken::new();
        let stream = self
            .factory
            .create_stream(req, cancel.clone())
            .await
            .map_err(|err| {
                warn!(error = %err, "stream creation failed");
                Reject::internal(err.to_string())
            })?;

        Ok(Accepted {
            handler: ServerStreamConn::new(stream, cancel),
            codec: Arc::new(EnvelopeCodec),
        })
    }
}
