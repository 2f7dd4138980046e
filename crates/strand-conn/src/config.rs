//! Per-connection configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Predicate over the `Origin` header of an upgrade request.
pub type OriginPredicate = Arc<dyn Fn(Option<&str>) -> bool + Send + Sync>;

/// Origin policy applied before the WebSocket upgrade.
#[derive(Clone, Default)]
pub enum OriginPolicy {
    /// Accept every origin. Configure a predicate for production.
    #[default]
    AllowAll,
    /// Accept only origins the predicate approves. The predicate receives
    /// `None` when the request carries no `Origin` header.
    Predicate(OriginPredicate),
}

impl OriginPolicy {
    /// Build a predicate policy.
    pub fn predicate(check: impl Fn(Option<&str>) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(check))
    }

    /// Whether the given origin may upgrade.
    pub fn allows(&self, origin: Option<&str>) -> bool {
        match self {
            Self::AllowAll => true,
            Self::Predicate(check) => check(origin),
        }
    }
}

impl fmt::Debug for OriginPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllowAll => f.write_str("AllowAll"),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Tuning knobs for one connection.
#[derive(Clone, Debug)]
pub struct ConnConfig {
    /// Heartbeat cadence (default 30 s).
    pub ping_period: Duration,
    /// Silence window after which `on_timeout` is consulted (default 300 s).
    /// Any inbound frame, pongs included, resets the window.
    pub silence_timeout: Duration,
    /// Capacity of the serialized writer's queue.
    pub writer_capacity: usize,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
    /// Transport write buffer size in bytes.
    pub write_buffer_size: usize,
    /// Origin policy for upgrades.
    pub origin: OriginPolicy,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            ping_period: Duration::from_secs(30),
            silence_timeout: Duration::from_secs(300),
            writer_capacity: 64,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            write_buffer_size: 128 * 1024,
            origin: OriginPolicy::AllowAll,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ping_period() {
        assert_eq!(ConnConfig::default().ping_period, Duration::from_secs(30));
    }

    #[test]
    fn default_silence_timeout() {
        assert_eq!(
            ConnConfig::default().silence_timeout,
            Duration::from_secs(300)
        );
    }

    #[test]
    fn default_writer_capacity() {
        assert_eq!(ConnConfig::default().writer_capacity, 64);
    }

    #[test]
    fn default_origin_allows_all() {
        let cfg = ConnConfig::default();
        assert!(cfg.origin.allows(None));
        assert!(cfg.origin.allows(Some("https://anywhere.example")));
    }

    #[test]
    fn predicate_policy_filters() {
        let policy = OriginPolicy::predicate(|origin| {
            origin.is_some_and(|o| o.ends_with(".example.com"))
        });
        assert!(policy.allows(Some("https://app.example.com")));
        assert!(!policy.allows(Some("https://evil.test")));
        assert!(!policy.allows(None));
    }

    #[test]
    fn config_is_cloneable() {
        let cfg = ConnConfig {
            ping_period: Duration::from_millis(100),
            origin: OriginPolicy::predicate(|_| true),
            ..ConnConfig::default()
        };
        let copy = cfg.clone();
        assert_eq!(copy.ping_period, Duration::from_millis(100));
        assert!(copy.origin.allows(None));
    }

    #[test]
    fn debug_formats_policy() {
        assert_eq!(format!("{:?}", OriginPolicy::AllowAll), "AllowAll");
        let policy = OriginPolicy::predicate(|_| false);
        assert_eq!(format!("{policy:?}"), "Predicate(..)");
    }
}
