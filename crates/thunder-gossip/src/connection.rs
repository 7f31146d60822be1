//! Per-connection plumbing.
//!
//! This module provides the pieces every connection task owns:
//! - [`ConnectionId`]: Process-unique connection identifier
//! - [`PeerHandle`]: Cloneable, non-blocking send side of a connection
//! - [`Link`]: Transport endpoint (send handle plus inbound event stream)
//! - [`ConnectionContext`]: Explicit context passed to every gossip operation
//!
//! The in-memory [`Link::pair`] stands in for the real transport: it delivers decoded
//! envelopes in order over bounded queues, and can inject transport faults.

use crate::error::{GossipError, GossipResult};
use crate::message::Envelope;
use crate::store::AddressStore;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Default outbound queue capacity per connection.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates a fresh identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// We dialed the peer.
    Initiator,
    /// The peer dialed us.
    Acceptor,
}

impl ConnectionRole {
    /// Returns true if the local node opened the connection.
    #[must_use]
    pub const fn is_initiator(&self) -> bool {
        matches!(self, Self::Initiator)
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport is being set up.
    Connecting,
    /// Connection is up and processing messages.
    Active,
    /// Connection is gone. Terminal.
    Closed,
}

impl ConnectionState {
    /// Returns true if messages may be processed.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns true if the connection is in its terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// An event delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A decoded inbound message.
    Message(Envelope),
    /// An I/O level fault; fatal for the connection.
    Fault(String),
}

/// Cloneable send side of a connection.
///
/// Sends never wait: a full queue fails that one delivery so a slow peer cannot stall
/// the caller, which may be fanning out to every other peer.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: ConnectionId,
    sender: mpsc::Sender<TransportEvent>,
}

impl PeerHandle {
    /// Creates a handle around a transport queue.
    #[must_use]
    pub const fn new(id: ConnectionId, sender: mpsc::Sender<TransportEvent>) -> Self {
        Self { id, sender }
    }

    /// Returns the connection this handle sends on.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues an envelope for the peer.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::QueueFull`] if the outbound buffer is full, or
    /// [`GossipError::ConnectionClosed`] if the peer side is gone.
    pub fn send(&self, envelope: Envelope) -> GossipResult<()> {
        self.sender
            .try_send(TransportEvent::Message(envelope))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => GossipError::QueueFull(self.id.value()),
                mpsc::error::TrySendError::Closed(_) => {
                    GossipError::ConnectionClosed(self.id.value())
                }
            })
    }

    /// Returns true if the peer side is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// One end of a transport connection.
#[derive(Debug)]
pub struct Link {
    handle: PeerHandle,
    inbound: mpsc::Receiver<TransportEvent>,
    injector: mpsc::WeakSender<TransportEvent>,
}

impl Link {
    /// Creates a connected pair of links.
    ///
    /// Returns `(link_a, link_b)` where envelopes sent on `link_a`'s handle arrive on
    /// `link_b`'s inbound stream and vice versa.
    #[must_use]
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(capacity);
        let (tx_b, rx_b) = mpsc::channel(capacity);

        let link_a = Self {
            injector: tx_a.downgrade(),
            handle: PeerHandle::new(ConnectionId::next(), tx_b.clone()),
            inbound: rx_a,
        };
        let link_b = Self {
            injector: tx_b.downgrade(),
            handle: PeerHandle::new(ConnectionId::next(), tx_a),
            inbound: rx_b,
        };

        (link_a, link_b)
    }

    /// Returns this end's connection id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Returns the handle used to send to the remote end.
    #[must_use]
    pub const fn handle(&self) -> &PeerHandle {
        &self.handle
    }

    /// Returns a sender that injects events into this end's inbound stream.
    ///
    /// Used to simulate transport faults. Returns `None` once the remote end is gone.
    /// The link only holds a weak reference so the stream still ends when the remote
    /// end drops.
    #[must_use]
    pub fn injector(&self) -> Option<mpsc::Sender<TransportEvent>> {
        self.injector.upgrade()
    }

    /// Receives the next transport event; `None` once the remote end is gone.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }

    /// Receives without waiting.
    pub fn try_recv(&mut self) -> Option<TransportEvent> {
        self.inbound.try_recv().ok()
    }

    /// Splits into the send handle and the inbound stream.
    #[must_use]
    pub fn into_parts(self) -> (PeerHandle, mpsc::Receiver<TransportEvent>) {
        (self.handle, self.inbound)
    }
}

/// Explicit context for one connection, passed to every gossip operation.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    handle: PeerHandle,
    role: ConnectionRole,
    store: Arc<dyn AddressStore>,
}

impl ConnectionContext {
    /// Creates a context for a connection with its session-scoped store handle.
    #[must_use]
    pub fn new(handle: PeerHandle, role: ConnectionRole, store: Arc<dyn AddressStore>) -> Self {
        Self {
            handle,
            role,
            store,
        }
    }

    /// Returns the connection id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Returns which side opened the connection.
    #[must_use]
    pub const fn role(&self) -> ConnectionRole {
        self.role
    }

    /// Returns the send handle for this connection.
    #[must_use]
    pub const fn handle(&self) -> &PeerHandle {
        &self.handle
    }

    /// Returns the store handle acquired for this session.
    #[must_use]
    pub fn store(&self) -> &dyn AddressStore {
        self.store.as_ref()
    }

    /// Sends an envelope back on this connection.
    ///
    /// # Errors
    ///
    /// See [`PeerHandle::send`].
    pub fn reply(&self, envelope: Envelope) -> GossipResult<()> {
        self.handle.send(envelope)
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
