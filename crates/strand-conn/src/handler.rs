//! Connection handler capability trait and the reusable `BaseConn` state.
//!
//! Handlers are the user-provided half of a connection: the engine drives the
//! lifecycle and calls into this capability set. Shared behaviour lives in
//! [`BaseConn`], which handlers hold by composition and delegate to.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use strand_core::errors::ConnError;
use strand_core::ids::ConnectionId;

use crate::debug::{DebugInfo, WriterDebug};
use crate::outbound::{Heartbeat, Terminal};
use crate::writer::SerializedWriter;

/// Lifecycle and message hooks for one connection.
///
/// The engine guarantees single-threaded invocation: no two hooks run
/// concurrently for the same connection.
#[async_trait]
pub trait ConnHandler: Send + 'static {
    /// Inbound (decoded) message type.
    type In: Send + 'static;
    /// Outbound message type.
    type Out: Send + 'static;

    /// Called once after the transport is installed and the writer exists.
    /// Returning an error abandons the connection without messaging the peer.
    async fn on_start(
        &mut self,
        writer: Arc<SerializedWriter<Self::Out>>,
    ) -> Result<(), ConnError>;

    /// Called for each decoded inbound message.
    async fn handle_message(&mut self, msg: Self::In) -> Result<(), ConnError>;

    /// Called for recoverable errors. Returning `Ok` suppresses the error and
    /// keeps the connection open; returning `Err` closes it.
    async fn on_error(&mut self, err: ConnError) -> Result<(), ConnError> {
        match err {
            ConnError::Codec(err) => {
                warn!(error = %err, "dropping undecodable message");
                Ok(())
            }
            other => Err(other),
        }
    }

    /// Consulted when the peer has been silent past the deadline. `true`
    /// closes the connection.
    fn on_timeout(&mut self) -> bool {
        true
    }

    /// Called exactly once when the connection is closing.
    async fn on_close(&mut self);

    /// Enqueue one heartbeat. Invoked by the engine on each heartbeat tick.
    async fn send_ping(&mut self) -> Result<(), ConnError>;

    /// Human-readable connection name, for logs.
    fn name(&self) -> &str;

    /// Stable connection id.
    fn connection_id(&self) -> &str;
}

/// Common per-connection state: identity, heartbeat counter, and the writer.
///
/// Handlers embed this by value and forward the trait's identity and ping
/// methods to it.
pub struct BaseConn<O> {
    name: String,
    conn_id: ConnectionId,
    ping_id: AtomicI64,
    writer: Option<Arc<SerializedWriter<O>>>,
}

impl<O: Send + 'static> BaseConn<O> {
    /// Create with a generated connection id.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(name, ConnectionId::new())
    }

    /// Create with a caller-provided connection id.
    pub fn with_id(name: impl Into<String>, conn_id: ConnectionId) -> Self {
        Self {
            name: name.into(),
            conn_id,
            ping_id: AtomicI64::new(0),
            writer: None,
        }
    }

    /// Install the writer. Called from `on_start`.
    pub fn install(&mut self, writer: Arc<SerializedWriter<O>>) {
        self.writer = Some(writer);
    }

    /// The installed writer, if any.
    pub fn writer(&self) -> Option<&Arc<SerializedWriter<O>>> {
        self.writer.as_ref()
    }

    /// Connection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connection id.
    pub fn connection_id(&self) -> &str {
        self.conn_id.as_str()
    }

    /// Last heartbeat sequence number handed out.
    pub fn ping_id(&self) -> i64 {
        self.ping_id.load(Ordering::Relaxed)
    }

    /// Enqueue an application payload, waiting for queue space.
    pub async fn send_output(&self, msg: O) -> Result<(), ConnError> {
        match &self.writer {
            Some(writer) => writer.send_data(msg).await,
            None => Err(ConnError::WriterClosed),
        }
    }

    /// Enqueue an application payload without blocking. `false` when the
    /// queue is full or the writer is gone.
    pub fn try_send_output(&self, msg: O) -> bool {
        self.writer
            .as_ref()
            .is_some_and(|writer| writer.try_send_data(msg))
    }

    /// Enqueue a terminal error envelope for the peer.
    pub async fn send_error(&self, message: impl Into<String> + Send) -> Result<(), ConnError> {
        match &self.writer {
            Some(writer) => writer.send_terminal(Terminal::Error(message.into())).await,
            None => Err(ConnError::WriterClosed),
        }
    }

    /// Increment the heartbeat counter and enqueue a ping.
    pub async fn send_ping(&self) -> Result<(), ConnError> {
        let ping_id = self.ping_id.fetch_add(1, Ordering::Relaxed) + 1;
        let Some(writer) = &self.writer else {
            return Err(ConnError::WriterClosed);
        };
        writer
            .send_heartbeat(Heartbeat {
                ping_id,
                conn_id: self.conn_id.to_string(),
                name: self.name.clone(),
            })
            .await
    }

    /// Lock-free snapshot for diagnostics.
    pub fn debug_info(&self) -> DebugInfo {
        DebugInfo {
            name: self.name.clone(),
            conn_id: self.conn_id.to_string(),
            ping_id: self.ping_id(),
            writer: self.writer.as_ref().map(|writer| WriterDebug {
                queue_depth: writer.queue_depth(),
                dropped: writer.dropped(),
            }),
        }
    }
}

/// Dynamic-JSON connection: accepts any JSON value and logs it.
///
/// A ready-made handler for prototyping; pair it with
/// [`strand_core::codec::JsonCodec`].
pub struct JsonConn {
    base: BaseConn<Value>,
}

impl JsonConn {
    /// Create a new connection handler.
    pub fn new() -> Self {
        Self {
            base: BaseConn::new("json_conn"),
        }
    }

    /// Shared state, for sends and diagnostics.
    pub fn base(&self) -> &BaseConn<Value> {
        &self.base
    }

    /// Send a JSON value to the peer.
    pub async fn send(&self, value: Value) -> Result<(), ConnError> {
        self.base.send_output(value).await
    }
}

impl Default for JsonConn {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnHandler for JsonConn {
    type In = Value;
    type Out = Value;

    async fn on_start(&mut self, writer: Arc<SerializedWriter<Value>>) -> Result<(), ConnError> {
        self.base.install(writer);
        Ok(())
    }

    async fn handle_message(&mut self, msg: Value) -> Result<(), ConnError> {
        debug!(%msg, "received message");
        Ok(())
    }

    async fn on_close(&mut self) {}

    async fn send_ping(&mut self) -> Result<(), ConnError> {
        self.base.send_ping().await
    }

    fn name(&self) -> &str {
        self.base.name()
    }

    fn connection_id(&self) -> &str {
        self.base.connection_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{collect_frames, RecordingWrite};
    use serde_json::json;
    use strand_core::errors::{CodecError, TransportError};
    use strand_core::frame::FrameKind;

    fn make_writer() -> (
        Arc<SerializedWriter<Value>>,
        tokio::sync::mpsc::UnboundedReceiver<strand_core::frame::Frame>,
    ) {
        let (write, rx) = RecordingWrite::new();
        let writer = SerializedWriter::spawn(
            write,
            |msg: &Value| Ok((serde_json::to_vec(msg)?, FrameKind::Text)),
            8,
        );
        (Arc::new(writer), rx)
    }

    #[test]
    fn generated_id_is_non_empty_and_stable() {
        let base: BaseConn<Value> = BaseConn::new("test");
        let id = base.connection_id().to_owned();
        assert!(!id.is_empty());
        assert_eq!(base.connection_id(), id);
    }

    #[test]
    fn caller_provided_id_kept() {
        let base: BaseConn<Value> = BaseConn::with_id("test", "custom-1".into());
        assert_eq!(base.connection_id(), "custom-1");
    }

    #[tokio::test]
    async fn ping_ids_are_monotonic_from_one() {
        let (writer, mut frames) = make_writer();
        let mut base: BaseConn<Value> = BaseConn::new("hb");
        base.install(writer.clone());

        for _ in 0..3 {
            base.send_ping().await.unwrap();
        }
        writer.stop().await;

        let written = collect_frames(&mut frames);
        let ids: Vec<i64> = written
            .iter()
            .map(|frame| {
                let value: Value = serde_json::from_slice(&frame.payload).unwrap();
                assert_eq!(value["type"], "ping");
                value["pingId"].as_i64().unwrap()
            })
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(base.ping_id(), 3);
    }

    #[tokio::test]
    async fn sends_fail_before_install() {
        let base: BaseConn<Value> = BaseConn::new("early");
        assert!(matches!(
            base.send_output(json!(1)).await,
            Err(ConnError::WriterClosed)
        ));
        assert!(matches!(
            base.send_ping().await,
            Err(ConnError::WriterClosed)
        ));
        assert!(!base.try_send_output(json!(2)));
    }

    #[tokio::test]
    async fn debug_info_reports_writer_state() {
        let (writer, _frames) = make_writer();
        let mut base: BaseConn<Value> = BaseConn::new("dbg");
        assert!(base.debug_info().writer.is_none());

        base.install(writer.clone());
        base.send_ping().await.unwrap();
        let info = base.debug_info();
        assert_eq!(info.name, "dbg");
        assert_eq!(info.ping_id, 1);
        assert!(info.writer.is_some());
        writer.stop().await;
    }

    #[tokio::test]
    async fn send_error_emits_error_envelope() {
        let (writer, mut frames) = make_writer();
        let mut base: BaseConn<Value> = BaseConn::new("err");
        base.install(writer.clone());
        base.send_error("upstream gone").await.unwrap();
        writer.stop().await;

        let written = collect_frames(&mut frames);
        assert_eq!(written.len(), 1);
        let value: Value = serde_json::from_slice(&written[0].payload).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"], "upstream gone");
    }

    #[tokio::test]
    async fn default_on_error_masks_codec_errors() {
        let mut conn = JsonConn::new();
        let codec_err = ConnError::Codec(CodecError::UnexpectedFrameKind {
            expected: FrameKind::Text,
            got: FrameKind::Binary,
        });
        assert!(conn.on_error(codec_err).await.is_ok());

        let transport_err = ConnError::Transport(TransportError::Io("reset".into()));
        assert!(conn.on_error(transport_err).await.is_err());
    }

    #[tokio::test]
    async fn default_on_timeout_closes() {
        let mut conn = JsonConn::new();
        assert!(conn.on_timeout());
    }

    #[tokio::test]
    async fn json_conn_sends_through_writer() {
        let (writer, mut frames) = make_writer();
        let mut conn = JsonConn::new();
        conn.on_start(writer.clone()).await.unwrap();
        conn.send(json!({"hello": "world"})).await.unwrap();
        writer.stop().await;

        let written = collect_frames(&mut frames);
        assert_eq!(written.len(), 1);
        let value: Value = serde_json::from_slice(&written[0].payload).unwrap();
        assert_eq!(value["hello"], "world");
    }
}
