//! Configuration knobs for connections and the listener: buffer and
//! message-size limits, allowed subprotocols, and the keepalive and
//! close-grace timings. Plain structs with a `Default` impl, in keeping
//! with the rest of this crate's configuration types.

use std::time::Duration;

/// Per-connection limits and behavior, applied uniformly by every
/// `Connection` a `Listener` creates.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Maximum accepted incoming frame payload length. Frames larger than
    /// this fail the connection with close code 1009.
    pub max_in: u64,
    /// Maximum outbound frame payload length before `send` fragments a
    /// message into multiple frames.
    pub max_out: u64,
    /// Subprotocols this server is willing to negotiate (used only to
    /// test membership, not preference — the client's own preference
    /// order wins).
    pub allowed_subprotocols: Vec<String>,
    /// Grace period between sending our close frame and force-closing the
    /// TCP socket if the peer never replies.
    pub close_grace: Duration,
    /// Idle duration after which the driver should ping a connection.
    pub ping_after_idle: Duration,
    /// Idle duration after which the driver should drop a connection.
    pub drop_after_idle: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            max_in: u64::MAX,
            max_out: u64::MAX,
            allowed_subprotocols: Vec::new(),
            close_grace: Duration::from_secs(5),
            ping_after_idle: Duration::from_secs(60),
            drop_after_idle: Duration::from_secs(120),
        }
    }
}

/// Listener-level configuration: bind address, optional TLS, and the
/// per-connection defaults applied to every connection it accepts.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_host: String,
    pub bind_port: u16,
    /// Specific local interface to bind to, if not the wildcard address.
    pub bind_ip: Option<String>,
    #[cfg(feature = "tls")]
    pub tls: Option<crate::tls::TlsCertConfig>,
    pub connection: ConnectionConfig,
}

impl ListenerConfig {
    pub fn new(bind_host: impl Into<String>, bind_port: u16) -> Self {
        ListenerConfig {
            bind_host: bind_host.into(),
            bind_port,
            bind_ip: None,
            #[cfg(feature = "tls")]
            tls: None,
            connection: ConnectionConfig::default(),
        }
    }

    #[cfg(feature = "tls")]
    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    #[cfg(not(feature = "tls"))]
    pub fn is_secure(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_config_defaults_are_permissive() {
        let cfg = ConnectionConfig::default();
        assert_eq!(cfg.max_in, u64::MAX);
        assert_eq!(cfg.max_out, u64::MAX);
        assert_eq!(cfg.close_grace, Duration::from_secs(5));
        assert_eq!(cfg.ping_after_idle, Duration::from_secs(60));
        assert_eq!(cfg.drop_after_idle, Duration::from_secs(120));
    }

    #[test]
    fn listener_config_defaults_to_insecure() {
        let cfg = ListenerConfig::new("127.0.0.1", 9001);
        assert!(!cfg.is_secure());
    }
}
