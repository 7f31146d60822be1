//! Error types for thunder-gossip.

use thiserror::Error;

use crate::protocol::NodeId;

/// Errors that can occur in gossip operations.
///
/// Only [`GossipError::Transport`] and [`GossipError::ConnectionClosed`] are fatal for a
/// connection. Everything else is contained where it happens: logged, dropped, and never
/// reported to the remote peer.
#[derive(Debug, Error)]
pub enum GossipError {
    /// Payload could not be parsed into the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// Announcement signature is missing or does not verify.
    #[error("invalid signature from {node_id}: {reason}")]
    InvalidSignature {
        /// The claimed announcer.
        node_id: NodeId,
        /// Why verification failed.
        reason: String,
    },

    /// Announcement timestamp is outside the accepted window.
    #[error("stale announcement from {node_id} (timestamp {timestamp})")]
    Stale {
        /// The claimed announcer.
        node_id: NodeId,
        /// The announcement's timestamp in seconds since epoch.
        timestamp: i64,
    },

    /// Address store failure.
    #[error("store error: {0}")]
    Store(String),

    /// Outbound queue of a peer is full; the message was dropped.
    #[error("outbound queue full for connection {0}")]
    QueueFull(u64),

    /// Peer connection is gone.
    #[error("connection {0} is closed")]
    ConnectionClosed(u64),

    /// I/O level failure on the transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GossipError {
    /// Returns true if the error must terminate the connection it occurred on.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ConnectionClosed(_))
    }

    /// Returns true for errors that mean "this data is not acceptable", which are
    /// dropped without a trace on the wire.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::InvalidSignature { .. } | Self::Stale { .. })
    }
}

/// Result type for gossip operations.
pub type GossipResult<T> = Result<T, GossipError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_fatal() {
        assert!(GossipError::Transport("reset by peer".to_string()).is_fatal());
        assert!(GossipError::ConnectionClosed(7).is_fatal());
    }

    #[test]
    fn protocol_errors_are_contained() {
        let node_id = NodeId::from_bytes([1; 32]);
        assert!(!GossipError::Decode("bad json".to_string()).is_fatal());
        assert!(!GossipError::QueueFull(3).is_fatal());
        assert!(
            !GossipError::InvalidSignature {
                node_id,
                reason: "bad".to_string()
            }
            .is_fatal()
        );
        assert!(
            GossipError::Stale {
                node_id,
                timestamp: 0
            }
            .is_rejection()
        );
    }

    #[test]
    fn error_display_includes_context() {
        let err = GossipError::QueueFull(42);
        assert_eq!(err.to_string(), "outbound queue full for connection 42");
    }
}
