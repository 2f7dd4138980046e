//! Upstream stream handles.
//!
//! The bridge talks to its upstream through three small capability traits:
//! receive, send-with-half-close, and the unary-response client-stream shape.
//! Each method may block; cancellation travels out-of-band through the
//! connection's `CancellationToken`, so no runtime-specific stream type leaks
//! into the API.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Failure reported by an upstream stream handle.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The stream was cancelled (locally or via the peer's cancel).
    #[error("stream cancelled")]
    Cancelled,

    /// The handle was used after close.
    #[error("stream closed")]
    Closed,

    /// The upstream service reported an error.
    #[error("{0}")]
    Remote(String),
}

impl UpstreamError {
    /// Build a remote error from any displayable value.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }
}

/// Receive side of an upstream stream. `Ok(None)` is clean end-of-stream.
#[async_trait]
pub trait StreamRecv: Send + 'static {
    /// Received item type.
    type Item: Send;

    /// Await the next item.
    async fn recv(&mut self) -> Result<Option<Self::Item>, UpstreamError>;
}

/// Send side of an upstream stream, with half-close.
#[async_trait]
pub trait StreamSend: Send + 'static {
    /// Sent item type.
    type Item: Send;

    /// Push one item upstream.
    async fn send(&mut self, item: Self::Item) -> Result<(), UpstreamError>;

    /// Signal that no more items will be sent. The receive side (if any)
    /// keeps flowing.
    async fn close_send(&mut self) -> Result<(), UpstreamError>;
}

/// Client-streaming handle: push many requests, then close and collect the
/// single terminal response.
#[async_trait]
pub trait ClientStream: Send + 'static {
    /// Request type pushed upstream.
    type Req: Send;
    /// The one terminal response type.
    type Resp: Send;

    /// Push one request.
    async fn send(&mut self, req: Self::Req) -> Result<(), UpstreamError>;

    /// Half-close and await the terminal response.
    async fn close_and_recv(&mut self) -> Result<Self::Resp, UpstreamError>;
}

/// Channel-backed receive handle: `Ok(None)` when the sender is dropped.
#[async_trait]
impl<T: Send + 'static> StreamRecv for mpsc::Receiver<Result<T, UpstreamError>> {
    type Item = T;

    async fn recv(&mut self) -> Result<Option<T>, UpstreamError> {
        match mpsc::Receiver::recv(self).await {
            Some(Ok(item)) => Ok(Some(item)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }
}

/// Channel-backed send handle. `close_send` drops the sender so the upstream
/// receiver observes end-of-stream.
pub struct ChannelSender<T> {
    tx: Option<mpsc::Sender<T>>,
}

impl<T> ChannelSender<T> {
    /// Wrap a channel sender.
    pub fn new(tx: mpsc::Sender<T>) -> Self {
        Self { tx: Some(tx) }
    }
}

#[async_trait]
impl<T: Send + 'static> StreamSend for ChannelSender<T> {
    type Item = T;

    async fn send(&mut self, item: T) -> Result<(), UpstreamError> {
        match &self.tx {
            Some(tx) => tx.send(item).await.map_err(|_| UpstreamError::Closed),
            None => Err(UpstreamError::Closed),
        }
    }

    async fn close_send(&mut self) -> Result<(), UpstreamError> {
        self.tx = None;
        Ok(())
    }
}
