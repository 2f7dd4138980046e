//! The union type every outbound write is expressed as.
//!
//! Application data, heartbeats, and terminal errors all funnel through the
//! same [`Outbound`] value so a single writer can serialize them onto the
//! transport in enqueue order.

/// Heartbeat metadata carried by a ping frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    /// Monotonic per-connection ping sequence number, starting at 1.
    pub ping_id: i64,
    /// Connection id, echoed so clients can correlate.
    pub conn_id: String,
    /// Human-readable connection name.
    pub name: String,
}

/// Terminal notification pushed through the writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminal {
    /// The producing side finished cleanly. Nothing is written.
    EndOfStream,
    /// A failure the peer should hear about before the transport closes.
    Error(String),
}

/// One outbound item. Consumers dispatch on the variant; exactly one branch
/// is inhabited by construction.
#[derive(Clone, Debug)]
pub enum Outbound<O> {
    /// An application payload, encoded by the connection's codec.
    Data(O),
    /// A heartbeat, always written as a JSON text frame.
    Heartbeat(Heartbeat),
    /// A terminal notification, always written as a JSON text frame.
    Terminal(Terminal),
}
