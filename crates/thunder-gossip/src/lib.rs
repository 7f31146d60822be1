//! # thunder-gossip
//!
//! Gossip layer for the Thunder overlay network.
//!
//! Nodes flood signed address announcements so every participant learns how to reach
//! every other one. This crate provides:
//!
//! - Signature and freshness checks on every announcement before it is trusted
//! - Atomic dedup so a flood terminates after one wave per node
//! - Best-effort, non-blocking fan-out to all other connections
//! - Pass-through of non-gossip messages to the next protocol layer, untouched
//! - Batch and inventory exchange for catching up without a flood
//!
//! ## Core Types
//!
//! - [`NodeId`]: Node identity, an Ed25519 public key
//! - [`AddressAnnouncement`]: Signed "node K is at ip:port as of time T"
//! - [`GossipEngine`]: Validates, deduplicates and floods announcements
//! - [`MessageRouter`]: Pipeline stage splitting gossip from everything else
//! - [`ConnectionLifecycle`]: Drives one connection from activation to close
//! - [`AddressStore`]: Atomic check-and-insert store of known announcements
//! - [`PeerRegistry`]: Live connections available for fan-out
//! - [`GossipNode`]: All of the above wired together

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address_book;
pub mod announcement;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod stats;
pub mod store;
pub mod telemetry;

pub use address_book::{AddressBook, AddressLearner, KnownAddress};
pub use announcement::{AddressAnnouncement, FreshnessWindow};
pub use config::GossipConfig;
pub use connection::{
    ConnectionContext, ConnectionId, ConnectionRole, ConnectionState, Link, PeerHandle,
    TransportEvent,
};
pub use engine::{Disposition, GossipEngine};
pub use error::{GossipError, GossipResult};
pub use lifecycle::{CloseReason, ConnectionLifecycle, ConnectionSummary};
pub use message::{DataKind, DataObject, Envelope, GossipMessage, InventoryDigest, InventoryEntry};
pub use node::GossipNode;
pub use protocol::{MessageClass, NodeId, TypeCode};
pub use registry::{BroadcastReport, PeerRegistry};
pub use router::{ChannelStage, MessageRouter, Pipeline, PipelineStage, StageOutcome};
pub use stats::{GossipStats, StatsSnapshot};
pub use store::{AddressStore, FileAddressStore, InsertOutcome, MemoryAddressStore, ReplacePolicy};
pub use telemetry::{LogFormat, init_tracing};
