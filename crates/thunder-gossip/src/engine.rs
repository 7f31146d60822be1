//! Gossip engine: validation, dedup and flood broadcast of address announcements.
//!
//! Every operation takes the [`ConnectionContext`] of the connection the message arrived
//! on. The engine never owns peers; it borrows handles from the [`PeerRegistry`] to fan
//! out and uses the context's handle to reply.

use crate::address_book::AddressLearner;
use crate::announcement::{AddressAnnouncement, FreshnessWindow};
use crate::config::GossipConfig;
use crate::connection::{ConnectionContext, ConnectionRole, PeerHandle};
use crate::error::{GossipError, GossipResult};
use crate::message::{DataObject, Envelope, GossipMessage, InventoryDigest, InventoryEntry};
use crate::protocol::NodeId;
use crate::registry::PeerRegistry;
use crate::stats::{GossipStats, StatsSnapshot};
use crate::store::{AddressStore, InsertOutcome};
use ed25519_dalek::SigningKey;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// What the engine did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Announcement was new, stored, and fanned out.
    Stored {
        /// How the store changed.
        outcome: InsertOutcome,
        /// Peers the announcement was queued to.
        fanout: usize,
    },
    /// Announcement was already known; flooding stops here.
    Duplicate,
    /// Announcement failed signature or freshness checks and was dropped.
    Rejected,
    /// A batch was sent back on the connection.
    Replied {
        /// Objects in the reply.
        items: usize,
    },
    /// Batch items were absorbed into local knowledge.
    Learned {
        /// Items that changed local knowledge.
        learned: usize,
        /// Items skipped (unknown kind, malformed, invalid, or already known).
        skipped: usize,
    },
    /// Nothing to do.
    Ignored,
}

/// Validates, deduplicates and floods address announcements.
#[derive(Debug)]
pub struct GossipEngine {
    config: GossipConfig,
    freshness: FreshnessWindow,
    signing_key: SigningKey,
    node_id: NodeId,
    store: Arc<dyn AddressStore>,
    registry: Arc<PeerRegistry>,
    learner: Arc<dyn AddressLearner>,
    stats: GossipStats,
}

impl GossipEngine {
    /// Creates an engine for the node holding `signing_key`.
    #[must_use]
    pub fn new(
        config: GossipConfig,
        signing_key: SigningKey,
        store: Arc<dyn AddressStore>,
        registry: Arc<PeerRegistry>,
        learner: Arc<dyn AddressLearner>,
    ) -> Self {
        let node_id = NodeId::from_public_key(&signing_key.verifying_key());
        Self {
            freshness: config.freshness(),
            config,
            signing_key,
            node_id,
            store,
            registry,
            learner,
            stats: GossipStats::new(),
        }
    }

    /// Returns the local node's identity.
    #[must_use]
    pub const fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Returns the peer registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Returns the address store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn AddressStore> {
        &self.store
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Opens the per-connection context, acquiring a session-scoped store handle.
    #[must_use]
    pub fn open_session(&self, handle: PeerHandle, role: ConnectionRole) -> ConnectionContext {
        debug!(conn = %handle.id(), ?role, "opening gossip session");
        ConnectionContext::new(handle, role, Arc::clone(&self.store))
    }

    /// Decodes a gossip-band envelope and handles it.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::Decode`] for malformed payloads, or the error of the
    /// specific handler.
    pub fn handle_envelope(
        &self,
        ctx: &ConnectionContext,
        envelope: &Envelope,
    ) -> GossipResult<Disposition> {
        let message = GossipMessage::decode(envelope).inspect_err(|_| {
            self.stats.record_decode_error();
        })?;
        self.handle(ctx, message)
    }

    /// Dispatches a decoded gossip message to its handler.
    ///
    /// # Errors
    ///
    /// Returns the error of the specific handler.
    pub fn handle(&self, ctx: &ConnectionContext, message: GossipMessage) -> GossipResult<Disposition> {
        match message {
            GossipMessage::Announce(announcement) => self.handle_announce(ctx, &announcement),
            GossipMessage::GetAddr => self.handle_get_addr(ctx),
            GossipMessage::Inventory(digest) => self.handle_inventory(ctx, &digest),
            GossipMessage::Batch(objects) => Ok(self.handle_batch(ctx, &objects)),
            GossipMessage::Unsupported(code) => {
                debug!(conn = %ctx.id(), %code, "unsupported gossip code");
                Ok(Disposition::Ignored)
            }
        }
    }

    /// Handles an announcement: verify, atomically dedup and store, then flood.
    ///
    /// Invalid announcements are dropped silently and reported as
    /// [`Disposition::Rejected`]; nothing is sent to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::Store`] if the store fails. The announcement is then not
    /// propagated.
    pub fn handle_announce(
        &self,
        ctx: &ConnectionContext,
        announcement: &AddressAnnouncement,
    ) -> GossipResult<Disposition> {
        self.stats.record_announcement_received();

        if let Err(e) = announcement.validate(&self.freshness) {
            self.stats.record_announcement_rejected();
            debug!(conn = %ctx.id(), error = %e, "dropping announcement");
            return Ok(Disposition::Rejected);
        }

        let outcome = ctx.store().insert_if_new(announcement)?;
        if !outcome.is_new() {
            self.stats.record_announcement_duplicate();
            trace!(conn = %ctx.id(), node = %announcement.node_id(), "announcement already known");
            return Ok(Disposition::Duplicate);
        }
        self.stats.record_announcement_stored();

        let fanout = self.broadcast(ctx, announcement)?;
        info!(
            conn = %ctx.id(),
            node = %announcement.node_id(),
            addr = %announcement.address(),
            port = announcement.port(),
            fanout,
            "stored new announcement"
        );
        Ok(Disposition::Stored { outcome, fanout })
    }

    /// Floods an announcement to every registered peer, minus the origin if configured.
    fn broadcast(
        &self,
        ctx: &ConnectionContext,
        announcement: &AddressAnnouncement,
    ) -> GossipResult<usize> {
        let envelope = GossipMessage::Announce(announcement.clone()).encode()?;
        let exclude = self.config.exclude_origin.then_some(ctx.id());
        let report = self.registry.broadcast(&envelope, exclude);

        self.stats.record_broadcast();
        self.stats
            .record_deliveries(report.delivered_count(), report.failed_count());
        Ok(report.delivered_count())
    }

    /// Answers a peer-list request with a batch of every known announcement.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the reply cannot be queued.
    pub fn handle_get_addr(&self, ctx: &ConnectionContext) -> GossipResult<Disposition> {
        let mut known = ctx.store().snapshot()?;
        known.sort_by_key(AddressAnnouncement::node_id);
        self.reply_with(ctx, &known)
    }

    /// Answers an inventory digest with the entries the sender lacks.
    ///
    /// An entry is lacking if the sender does not list the node at all, or lists it with
    /// an older timestamp than ours.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the reply cannot be queued.
    pub fn handle_inventory(
        &self,
        ctx: &ConnectionContext,
        digest: &InventoryDigest,
    ) -> GossipResult<Disposition> {
        let theirs: HashMap<NodeId, i64> = digest
            .entries
            .iter()
            .map(|e| (e.node_id, e.timestamp))
            .collect();

        let mut missing: Vec<_> = ctx
            .store()
            .snapshot()?
            .into_iter()
            .filter(|a| {
                theirs
                    .get(&a.node_id())
                    .is_none_or(|&timestamp| a.timestamp() > timestamp)
            })
            .collect();
        missing.sort_by_key(AddressAnnouncement::node_id);

        debug!(
            conn = %ctx.id(),
            advertised = digest.len(),
            missing = missing.len(),
            "inventory diff"
        );
        self.reply_with(ctx, &missing)
    }

    fn reply_with(
        &self,
        ctx: &ConnectionContext,
        announcements: &[AddressAnnouncement],
    ) -> GossipResult<Disposition> {
        if announcements.is_empty() {
            return Ok(Disposition::Ignored);
        }

        let objects = announcements
            .iter()
            .take(self.config.max_batch_items)
            .map(DataObject::from_announcement)
            .collect::<GossipResult<Vec<_>>>()?;
        let items = objects.len();

        ctx.reply(GossipMessage::Batch(objects).encode()?)?;
        Ok(Disposition::Replied { items })
    }

    /// Absorbs a batch into local knowledge without re-broadcasting.
    ///
    /// Only address announcements are interpreted; each must pass the same signature
    /// and freshness check as a flooded announcement.
    pub fn handle_batch(&self, ctx: &ConnectionContext, objects: &[DataObject]) -> Disposition {
        let mut learned = 0;
        let mut skipped = 0;

        for object in objects {
            let announcement = match object.as_announcement() {
                Some(Ok(announcement)) => announcement,
                Some(Err(e)) => {
                    self.stats.record_decode_error();
                    debug!(conn = %ctx.id(), error = %e, "skipping malformed batch item");
                    skipped += 1;
                    continue;
                }
                None => {
                    trace!(conn = %ctx.id(), kind = object.kind.0, "skipping batch item");
                    skipped += 1;
                    continue;
                }
            };

            if let Err(e) = announcement.validate(&self.freshness) {
                self.stats.record_announcement_rejected();
                debug!(conn = %ctx.id(), error = %e, "skipping invalid batch item");
                skipped += 1;
                continue;
            }

            if self.learner.learn(&announcement) {
                self.stats.record_batch_item_learned();
                learned += 1;
            } else {
                skipped += 1;
            }
        }

        debug!(conn = %ctx.id(), learned, skipped, "batch absorbed");
        Disposition::Learned { learned, skipped }
    }

    /// Builds and signs a fresh announcement for the local node.
    #[must_use]
    pub fn self_announcement(&self) -> AddressAnnouncement {
        AddressAnnouncement::signed(
            &self.signing_key,
            self.config.advertised_address.clone(),
            self.config.port,
        )
    }

    /// Sends a fresh self-announcement on one connection.
    ///
    /// The announcement is also recorded in the local store so that its echo from the
    /// overlay is recognised as known.
    ///
    /// # Errors
    ///
    /// Returns an error if the announcement cannot be queued on the connection.
    pub fn send_self_announcement(
        &self,
        ctx: &ConnectionContext,
    ) -> GossipResult<AddressAnnouncement> {
        let announcement = self.self_announcement();
        if let Err(e) = ctx.store().insert_if_new(&announcement) {
            warn!(conn = %ctx.id(), error = %e, "failed to record own announcement");
        }

        ctx.reply(GossipMessage::Announce(announcement.clone()).encode()?)?;
        info!(
            conn = %ctx.id(),
            node = %self.node_id,
            addr = %announcement.address(),
            port = announcement.port(),
            "sent self-announcement"
        );
        Ok(announcement)
    }

    /// Asks the peer for every address it knows.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be queued.
    pub fn send_get_addr(&self, ctx: &ConnectionContext) -> GossipResult<()> {
        ctx.reply(GossipMessage::GetAddr.encode()?)
    }

    /// Summarises everything this node knows: stored announcements plus addresses
    /// learned from batches, keeping the newest timestamp per node.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn inventory(&self) -> GossipResult<InventoryDigest> {
        let mut newest: HashMap<NodeId, i64> = HashMap::new();
        let stored = self.store.inventory()?.entries;
        for entry in stored.into_iter().chain(self.learner.inventory()) {
            newest
                .entry(entry.node_id)
                .and_modify(|timestamp| *timestamp = (*timestamp).max(entry.timestamp))
                .or_insert(entry.timestamp);
        }

        let mut entries: Vec<_> = newest
            .into_iter()
            .map(|(node_id, timestamp)| InventoryEntry { node_id, timestamp })
            .collect();
        entries.sort_by_key(|e| e.node_id);
        Ok(InventoryDigest::new(entries))
    }

    /// Sends the local inventory so the peer replies with what we lack.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the digest cannot be queued.
    pub fn send_inventory(&self, ctx: &ConnectionContext) -> GossipResult<()> {
        let digest = self.inventory()?;
        trace!(conn = %ctx.id(), entries = digest.len(), "sending inventory");
        ctx.reply(GossipMessage::Inventory(digest).encode()?)
    }

    /// Pushes a batch of objects to the peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be queued.
    pub fn send_batch(&self, ctx: &ConnectionContext, objects: Vec<DataObject>) -> GossipResult<()> {
        if objects.len() > self.config.max_batch_items {
            return Err(GossipError::Decode(format!(
                "batch of {} exceeds max_batch_items {}",
                objects.len(),
                self.config.max_batch_items
            )));
        }
        ctx.reply(GossipMessage::Batch(objects).encode()?)
    }

    /// Sends the failure signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be queued.
    pub fn send_failure(&self, ctx: &ConnectionContext) -> GossipResult<()> {
        ctx.reply(Envelope::failure())
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
