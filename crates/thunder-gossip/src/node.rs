//! A gossip participant: engine, pipeline, and connection tasks wired together.
//!
//! This module provides the main node interface:
//! - [`GossipNode`]: Owns the engine and spawns one task per connection
//! - [`GossipNode::connect`]: Wires two nodes together over an in-memory link

use crate::address_book::{AddressBook, AddressLearner};
use crate::announcement::AddressAnnouncement;
use crate::config::GossipConfig;
use crate::connection::{ConnectionRole, Link};
use crate::engine::GossipEngine;
use crate::error::GossipResult;
use crate::lifecycle::{ConnectionLifecycle, ConnectionSummary};
use crate::protocol::NodeId;
use crate::registry::PeerRegistry;
use crate::router::{MessageRouter, Pipeline, PipelineStage};
use crate::stats::StatsSnapshot;
use crate::store::{AddressStore, MemoryAddressStore};
use ed25519_dalek::SigningKey;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// A node taking part in address gossip.
#[derive(Debug, Clone)]
pub struct GossipNode {
    engine: Arc<GossipEngine>,
    router: MessageRouter,
    pipeline: Arc<Pipeline>,
    address_book: Arc<AddressBook>,
}

impl GossipNode {
    /// Creates a node over the given store.
    ///
    /// # Errors
    ///
    /// Returns [`crate::GossipError::Config`] if the configuration is invalid.
    pub fn new(
        config: GossipConfig,
        signing_key: SigningKey,
        store: Arc<dyn AddressStore>,
    ) -> GossipResult<Self> {
        config.validate()?;

        let address_book = Arc::new(AddressBook::new());
        let engine = Arc::new(GossipEngine::new(
            config,
            signing_key,
            store,
            Arc::new(PeerRegistry::new()),
            Arc::clone(&address_book) as Arc<dyn AddressLearner>,
        ));
        let router = MessageRouter::new(Arc::clone(&engine));
        let pipeline = Pipeline::new().with_stage(Arc::new(router.clone()));

        info!(node = %engine.node_id(), "gossip node created");
        Ok(Self {
            engine,
            router,
            pipeline: Arc::new(pipeline),
            address_book,
        })
    }

    /// Creates a node with an in-memory store using the configured replace policy.
    ///
    /// # Errors
    ///
    /// Returns [`crate::GossipError::Config`] if the configuration is invalid.
    pub fn in_memory(config: GossipConfig, signing_key: SigningKey) -> GossipResult<Self> {
        let store = Arc::new(MemoryAddressStore::new(config.replace_policy));
        Self::new(config, signing_key, store)
    }

    /// Appends a stage after the gossip router, typically the next protocol layer.
    ///
    /// Only connections spawned afterwards use it.
    #[must_use]
    pub fn with_next_layer(mut self, stage: Arc<dyn PipelineStage>) -> Self {
        self.pipeline = Arc::new(self.pipeline.as_ref().clone().with_stage(stage));
        self
    }

    /// Returns the engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<GossipEngine> {
        &self.engine
    }

    /// Returns the gossip stage of the pipeline.
    #[must_use]
    pub const fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Returns the local identity.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.engine.node_id()
    }

    /// Returns addresses learned from batches.
    #[must_use]
    pub fn address_book(&self) -> &AddressBook {
        &self.address_book
    }

    /// Returns the number of live connections.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.engine.registry().len()
    }

    /// Returns every stored announcement.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn known_announcements(&self) -> GossipResult<Vec<AddressAnnouncement>> {
        self.engine.store().snapshot()
    }

    /// Returns a snapshot of the engine counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.engine.stats()
    }

    /// Spawns the task driving one connection. Must be called inside a Tokio runtime.
    pub fn spawn_connection(&self, link: Link, role: ConnectionRole) -> JoinHandle<ConnectionSummary> {
        let lifecycle =
            ConnectionLifecycle::new(Arc::clone(&self.engine), Arc::clone(&self.pipeline), role);
        tokio::spawn(lifecycle.run(link))
    }

    /// Connects `initiator` to `acceptor` over a fresh in-memory link.
    ///
    /// Returns the initiator's and the acceptor's connection tasks.
    pub fn connect(
        initiator: &Self,
        acceptor: &Self,
    ) -> (JoinHandle<ConnectionSummary>, JoinHandle<ConnectionSummary>) {
        let (outbound, inbound) = Link::pair(initiator.engine.config().outbound_capacity);
        let acceptor_task = acceptor.spawn_connection(inbound, ConnectionRole::Acceptor);
        let initiator_task = initiator.spawn_connection(outbound, ConnectionRole::Initiator);
        (initiator_task, acceptor_task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GossipError;
    use rand::rngs::OsRng;

    #[test]
    fn invalid_config_is_refused() {
        let config = GossipConfig::new("not-an-ip", 9000);
        assert!(matches!(
            GossipNode::in_memory(config, SigningKey::generate(&mut OsRng)),
            Err(GossipError::Config(_))
        ));
    }

    #[test]
    fn node_id_matches_signing_key() {
        let key = SigningKey::generate(&mut OsRng);
        let expected = NodeId::from_public_key(&key.verifying_key());
        let node = GossipNode::in_memory(GossipConfig::default(), key).unwrap();

        assert_eq!(node.node_id(), expected);
        assert_eq!(node.peer_count(), 0);
        assert!(node.known_announcements().unwrap().is_empty());
    }
}
