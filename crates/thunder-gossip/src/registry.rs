//! Registry of live peer connections.
//!
//! The registry owns the [`PeerHandle`]s; the gossip engine only borrows them to fan a
//! message out. Fan-out is best effort: a failed send to one peer is reported and the
//! remaining peers are still served.

use crate::connection::{ConnectionId, PeerHandle};
use crate::error::GossipError;
use crate::message::Envelope;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Outcome of a fan-out.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Connections the envelope was queued on.
    pub delivered: Vec<ConnectionId>,
    /// Connections where queuing failed, with the reason.
    pub failed: Vec<(ConnectionId, GossipError)>,
}

impl BroadcastReport {
    /// Returns the number of successful deliveries.
    #[must_use]
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    /// Returns the number of failed deliveries.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// Thread-safe set of currently connected peers.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<ConnectionId, PeerHandle>>,
}

impl PeerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection. Returns false if it was already registered.
    pub fn register(&self, handle: PeerHandle) -> bool {
        let id = handle.id();
        let inserted = self.peers.write().insert(id, handle).is_none();
        debug!(conn = %id, inserted, "peer registered");
        inserted
    }

    /// Removes a connection. Returns the handle if it was registered.
    pub fn unregister(&self, id: ConnectionId) -> Option<PeerHandle> {
        let removed = self.peers.write().remove(&id);
        if removed.is_some() {
            debug!(conn = %id, "peer unregistered");
        }
        removed
    }

    /// Returns true if the connection is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.peers.read().contains_key(&id)
    }

    /// Returns the number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Returns true if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Returns all registered connection ids.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.peers.read().keys().copied().collect()
    }

    /// Returns clones of every handle except `exclude`.
    ///
    /// Handles are cloned out so no lock is held while sending.
    #[must_use]
    pub fn handles_except(&self, exclude: Option<ConnectionId>) -> Vec<PeerHandle> {
        self.peers
            .read()
            .values()
            .filter(|h| exclude.is_none_or(|e| h.id() != e))
            .cloned()
            .collect()
    }

    /// Queues `envelope` on every registered connection except `exclude`.
    ///
    /// Connections whose peer side is gone are dropped from the registry.
    pub fn broadcast(&self, envelope: &Envelope, exclude: Option<ConnectionId>) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for handle in self.handles_except(exclude) {
            match handle.send(envelope.clone()) {
                Ok(()) => report.delivered.push(handle.id()),
                Err(e) => {
                    warn!(conn = %handle.id(), error = %e, "broadcast delivery failed");
                    if matches!(e, GossipError::ConnectionClosed(_)) {
                        self.unregister(handle.id());
                    }
                    report.failed.push((handle.id(), e));
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Link, TransportEvent};

    fn envelope() -> Envelope {
        Envelope::new(1201u16, b"{}".to_vec())
    }

    #[test]
    fn register_and_unregister() {
        let registry = PeerRegistry::new();
        let (a, _b) = Link::pair(4);

        assert!(registry.register(a.handle().clone()));
        assert!(!registry.register(a.handle().clone()));
        assert!(registry.contains(a.id()));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(a.id()).is_some());
        assert!(registry.unregister(a.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn broadcast_skips_excluded_connection() {
        let registry = PeerRegistry::new();
        let (a, mut a_remote) = Link::pair(4);
        let (b, mut b_remote) = Link::pair(4);
        registry.register(a.handle().clone());
        registry.register(b.handle().clone());

        let report = registry.broadcast(&envelope(), Some(a.id()));

        assert_eq!(report.delivered, vec![b.id()]);
        assert!(a_remote.try_recv().is_none());
        assert_eq!(
            b_remote.try_recv(),
            Some(TransportEvent::Message(envelope()))
        );
    }

    #[test]
    fn broadcast_continues_past_failed_peers() {
        let registry = PeerRegistry::new();
        let (full, _full_remote) = Link::pair(1);
        let (gone, gone_remote) = Link::pair(4);
        let (ok, mut ok_remote) = Link::pair(4);
        drop(gone_remote);

        full.handle().send(envelope()).unwrap();
        registry.register(full.handle().clone());
        registry.register(gone.handle().clone());
        registry.register(ok.handle().clone());

        let report = registry.broadcast(&envelope(), None);

        assert_eq!(report.delivered, vec![ok.id()]);
        assert_eq!(report.failed_count(), 2);
        assert!(ok_remote.try_recv().is_some());

        // Closed peers are pruned, merely slow ones are kept.
        assert!(!registry.contains(gone.id()));
        assert!(registry.contains(full.id()));
    }
}
