//! Connection lifecycle: activation, the inbound loop, and teardown.
//!
//! ```text
//! Connecting --activate--> Active --fault / end of stream / fatal error--> Closed
//! ```
//!
//! Activation registers the connection for fan-out, opens the session context, and,
//! on outbound connections only, sends exactly one self-announcement.

use crate::connection::{
    ConnectionContext, ConnectionId, ConnectionRole, ConnectionState, Link, PeerHandle,
    TransportEvent,
};
use crate::engine::GossipEngine;
use crate::error::{GossipError, GossipResult};
use crate::message::Envelope;
use crate::router::{Pipeline, StageOutcome};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The remote end went away cleanly.
    EndOfStream,
    /// The transport reported a fault.
    TransportFault(String),
    /// Processing hit an error that made the connection unusable.
    Fatal(String),
}

/// Summary returned when a connection task finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    /// The connection.
    pub id: ConnectionId,
    /// Which side opened it.
    pub role: ConnectionRole,
    /// Envelopes received while active.
    pub messages: u64,
    /// Envelopes that left the pipeline unconsumed.
    pub unhandled: u64,
    /// Why it ended.
    pub reason: CloseReason,
}

/// Drives one connection through its states.
#[derive(Debug)]
pub struct ConnectionLifecycle {
    engine: Arc<GossipEngine>,
    pipeline: Arc<Pipeline>,
    role: ConnectionRole,
    state: ConnectionState,
    ctx: Option<ConnectionContext>,
    messages: u64,
    unhandled: u64,
}

impl ConnectionLifecycle {
    /// Creates a lifecycle in the `Connecting` state.
    #[must_use]
    pub const fn new(engine: Arc<GossipEngine>, pipeline: Arc<Pipeline>, role: ConnectionRole) -> Self {
        Self {
            engine,
            pipeline,
            role,
            state: ConnectionState::Connecting,
            ctx: None,
            messages: 0,
            unhandled: 0,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the role.
    #[must_use]
    pub const fn role(&self) -> ConnectionRole {
        self.role
    }

    /// Returns the session context once active.
    #[must_use]
    pub const fn context(&self) -> Option<&ConnectionContext> {
        self.ctx.as_ref()
    }

    /// Activates the connection.
    ///
    /// Registers it with the peer registry and, if we opened it, sends our
    /// self-announcement. Calling this on a connection that is not `Connecting` is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns a fatal error if the self-announcement cannot be queued because the
    /// connection is already gone; the connection is closed in that case.
    pub fn activate(&mut self, handle: PeerHandle) -> GossipResult<()> {
        if self.state != ConnectionState::Connecting {
            debug!(conn = %handle.id(), state = ?self.state, "activate ignored");
            return Ok(());
        }

        let ctx = self.engine.open_session(handle.clone(), self.role);
        self.state = ConnectionState::Active;
        info!(conn = %ctx.id(), role = ?self.role, "connection active");

        // Announce before registering so no fan-out can overtake it.
        let announced = if self.role.is_initiator() {
            self.engine.send_self_announcement(&ctx).map(|_| ())
        } else {
            Ok(())
        };
        self.engine.registry().register(handle);
        self.ctx = Some(ctx);

        match announced {
            Err(e) if e.is_fatal() => {
                self.close();
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "self-announcement not sent");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Runs one inbound envelope through the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::ConnectionClosed`] if the connection is not active, or
    /// the fatal error raised by a stage, after which the connection is closed.
    pub fn on_envelope(&mut self, envelope: Envelope) -> GossipResult<StageOutcome> {
        let ctx = match (&self.ctx, self.state) {
            (Some(ctx), ConnectionState::Active) => ctx,
            (ctx, _) => {
                return Err(GossipError::ConnectionClosed(
                    ctx.as_ref().map_or(0, |c| c.id().value()),
                ));
            }
        };
        self.messages += 1;

        match self.pipeline.process(ctx, envelope) {
            Ok(StageOutcome::Forward(envelope)) => {
                self.unhandled += 1;
                debug!(conn = %ctx.id(), code = %envelope.type_code, "no stage consumed message");
                Ok(StageOutcome::Forward(envelope))
            }
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(conn = %ctx.id(), error = %e, "fatal error, closing connection");
                self.close();
                Err(e)
            }
        }
    }

    /// Handles a transport fault: logs it and closes the connection.
    pub fn on_transport_fault(&mut self, reason: &str) {
        match &self.ctx {
            Some(ctx) => error!(conn = %ctx.id(), reason, "transport fault"),
            None => error!(reason, "transport fault before activation"),
        }
        self.close();
    }

    /// Unregisters the connection and moves to `Closed`. Idempotent.
    pub fn close(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if let Some(ctx) = &self.ctx {
            self.engine.registry().unregister(ctx.id());
            info!(conn = %ctx.id(), messages = self.messages, "connection closed");
        }
        self.state = ConnectionState::Closed;
    }

    /// Activates the connection and processes inbound events until it ends.
    pub async fn run(mut self, link: Link) -> ConnectionSummary {
        let id = link.id();
        let (handle, mut inbound) = link.into_parts();

        let reason = match self.activate(handle) {
            Err(e) => CloseReason::Fatal(e.to_string()),
            Ok(()) => loop {
                match inbound.recv().await {
                    Some(TransportEvent::Message(envelope)) => {
                        if let Err(e) = self.on_envelope(envelope) {
                            break CloseReason::Fatal(e.to_string());
                        }
                    }
                    Some(TransportEvent::Fault(reason)) => {
                        self.on_transport_fault(&reason);
                        break CloseReason::TransportFault(reason);
                    }
                    None => {
                        debug!(conn = %id, "end of stream");
                        self.close();
                        break CloseReason::EndOfStream;
                    }
                }
            },
        };

        ConnectionSummary {
            id,
            role: self.role,
            messages: self.messages,
            unhandled: self.unhandled,
            reason,
        }
    }
}
