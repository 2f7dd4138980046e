//! Lock-free debug snapshot of a live connection.

use serde::Serialize;

/// Snapshot of the serialized writer.
#[derive(Clone, Debug, Serialize)]
pub struct WriterDebug {
    /// Approximate queued item count.
    pub queue_depth: usize,
    /// Payloads dropped by non-blocking sends.
    pub dropped: u64,
}

/// Snapshot of a connection, assembled from atomics only so it never
/// serializes with the hot path.
#[derive(Clone, Debug, Serialize)]
pub struct DebugInfo {
    /// Connection name.
    pub name: String,
    /// Connection id.
    pub conn_id: String,
    /// Last heartbeat sequence number handed out.
    pub ping_id: i64,
    /// Writer state, when a writer is installed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writer: Option<WriterDebug>,
}
