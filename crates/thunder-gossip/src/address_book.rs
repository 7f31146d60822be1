//! Local overlay knowledge fed by batch sends.
//!
//! Batches are a pull mechanism: a joining node absorbs a snapshot from one peer instead
//! of waiting for a flood per node. What it learns lands here and is not re-broadcast.

use crate::announcement::AddressAnnouncement;
use crate::message::InventoryEntry;
use crate::protocol::NodeId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use tracing::debug;

/// Sink for verified announcements learned outside the flood path.
pub trait AddressLearner: Send + Sync + fmt::Debug {
    /// Merges a verified announcement. Returns true if local knowledge changed.
    fn learn(&self, announcement: &AddressAnnouncement) -> bool;

    /// Lists what has been learned, for inclusion in outgoing inventory digests.
    fn inventory(&self) -> Vec<InventoryEntry>;
}

/// A learned endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownAddress {
    /// Reachable endpoint.
    pub addr: SocketAddr,
    /// Timestamp of the announcement it came from.
    pub timestamp: i64,
}

/// In-memory map from node to its most recent known endpoint.
#[derive(Debug, Default)]
pub struct AddressBook {
    entries: RwLock<HashMap<NodeId, KnownAddress>>,
}

impl AddressBook {
    /// Creates an empty address book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the known endpoint of a node.
    #[must_use]
    pub fn get(&self, node_id: &NodeId) -> Option<KnownAddress> {
        self.entries.read().get(node_id).copied()
    }

    /// Returns the number of known nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns every known node and endpoint.
    #[must_use]
    pub fn entries(&self) -> Vec<(NodeId, KnownAddress)> {
        self.entries.read().iter().map(|(k, v)| (*k, *v)).collect()
    }
}

impl AddressLearner for AddressBook {
    fn learn(&self, announcement: &AddressAnnouncement) -> bool {
        let Some(addr) = announcement.socket_addr() else {
            return false;
        };
        let incoming = KnownAddress {
            addr,
            timestamp: announcement.timestamp(),
        };

        let mut entries = self.entries.write();
        match entries.get(&announcement.node_id()) {
            Some(existing) if existing.timestamp >= incoming.timestamp => false,
            _ => {
                entries.insert(announcement.node_id(), incoming);
                debug!(node = %announcement.node_id(), %addr, "learned address");
                true
            }
        }
    }

    fn inventory(&self) -> Vec<InventoryEntry> {
        self.entries
            .read()
            .iter()
            .map(|(node_id, known)| InventoryEntry {
                node_id: *node_id,
                timestamp: known.timestamp,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn announcement_at(key: &SigningKey, ip: &str, timestamp: i64) -> AddressAnnouncement {
        let node_id = NodeId::from_public_key(&key.verifying_key());
        let mut announcement = AddressAnnouncement::with_timestamp(node_id, ip, 9000, timestamp);
        announcement.sign(key);
        announcement
    }

    #[test]
    fn learning_same_announcement_twice_is_idempotent() {
        let book = AddressBook::new();
        let key = SigningKey::generate(&mut OsRng);
        let announcement = announcement_at(&key, "10.0.0.1", 100);

        assert!(book.learn(&announcement));
        assert!(!book.learn(&announcement));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn newer_announcement_moves_the_node() {
        let book = AddressBook::new();
        let key = SigningKey::generate(&mut OsRng);

        book.learn(&announcement_at(&key, "10.0.0.1", 100));
        assert!(book.learn(&announcement_at(&key, "10.0.0.2", 200)));
        assert!(!book.learn(&announcement_at(&key, "10.0.0.3", 150)));

        let known = book
            .get(&NodeId::from_public_key(&key.verifying_key()))
            .unwrap();
        assert_eq!(known.addr, "10.0.0.2:9000".parse().unwrap());
        assert_eq!(known.timestamp, 200);
    }

    #[test]
    fn inventory_lists_latest_timestamp_per_node() {
        let book = AddressBook::new();
        let key = SigningKey::generate(&mut OsRng);
        book.learn(&announcement_at(&key, "10.0.0.1", 100));
        book.learn(&announcement_at(&key, "10.0.0.2", 200));

        assert_eq!(
            book.inventory(),
            vec![InventoryEntry {
                node_id: NodeId::from_public_key(&key.verifying_key()),
                timestamp: 200,
            }]
        );
    }
}
