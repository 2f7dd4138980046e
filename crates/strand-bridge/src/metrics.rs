//! Per-connection stream counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic counters for one streaming connection. Updated from the
/// forwarder task and the message handler concurrently.
#[derive(Debug)]
pub struct StreamMetrics {
    connected_at: Instant,
    sent: AtomicU64,
    received: AtomicU64,
}

impl StreamMetrics {
    /// Start counting now.
    pub fn new() -> Self {
        Self {
            connected_at: Instant::now(),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
        }
    }

    /// Count one message sent to the peer; returns the new total.
    pub fn inc_sent(&self) -> u64 {
        self.sent.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count one message received from the peer; returns the new total.
    pub fn inc_received(&self) -> u64 {
        self.received.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Messages sent so far.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Messages received so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// When this connection started.
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}
