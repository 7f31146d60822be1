//! Message routing for the per-connection pipeline.
//!
//! Each inbound [`Envelope`] passes through an ordered list of [`PipelineStage`]s. A
//! stage either consumes the envelope or forwards it, unchanged or rewritten, to the
//! next stage. [`MessageRouter`] is the gossip stage: it claims the gossip band and the
//! failure signal and forwards everything else untouched.

use crate::connection::{ConnectionContext, ConnectionId};
use crate::engine::{Disposition, GossipEngine};
use crate::error::GossipResult;
use crate::message::Envelope;
use crate::protocol::MessageClass;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// What a stage did with an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Fully handled; later stages never see it.
    Consumed,
    /// Handed on to the next stage.
    Forward(Envelope),
}

/// One stage of the inbound pipeline.
pub trait PipelineStage: Send + Sync + fmt::Debug {
    /// Handles an inbound envelope.
    ///
    /// # Errors
    ///
    /// Returns an error only when the connection itself is unusable. Anything
    /// recoverable must be handled inside the stage.
    fn handle(&self, ctx: &ConnectionContext, envelope: Envelope) -> GossipResult<StageOutcome>;
}

/// Traffic the router handled without involving the engine.
#[derive(Debug, Default)]
struct RouterCounters {
    failure_signals: AtomicU64,
    passed_through: AtomicU64,
}

/// Routes gossip-band messages to the engine and passes the rest through.
///
/// Only gossip-band messages reach the engine. The router keeps its own counts of the
/// traffic it passes on, shared between clones.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    engine: Arc<GossipEngine>,
    counters: Arc<RouterCounters>,
}

impl MessageRouter {
    /// Creates a router backed by `engine`.
    #[must_use]
    pub fn new(engine: Arc<GossipEngine>) -> Self {
        Self {
            engine,
            counters: Arc::default(),
        }
    }

    /// Returns the engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<GossipEngine> {
        &self.engine
    }

    /// Returns the number of failure signals received.
    #[must_use]
    pub fn failure_signals(&self) -> u64 {
        self.counters.failure_signals.load(Ordering::Relaxed)
    }

    /// Returns the number of envelopes forwarded to the next stage.
    #[must_use]
    pub fn passed_through(&self) -> u64 {
        self.counters.passed_through.load(Ordering::Relaxed)
    }
}

impl PipelineStage for MessageRouter {
    fn handle(&self, ctx: &ConnectionContext, envelope: Envelope) -> GossipResult<StageOutcome> {
        match envelope.type_code.class() {
            MessageClass::Gossip => {
                match self.engine.handle_envelope(ctx, &envelope) {
                    Ok(Disposition::Ignored) => {}
                    Ok(disposition) => {
                        trace!(conn = %ctx.id(), code = %envelope.type_code, ?disposition, "gossip handled");
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(conn = %ctx.id(), code = %envelope.type_code, error = %e, "gossip message dropped");
                    }
                }
                Ok(StageOutcome::Consumed)
            }
            MessageClass::Failure => {
                self.counters.failure_signals.fetch_add(1, Ordering::Relaxed);
                warn!(
                    conn = %ctx.id(),
                    detail = %String::from_utf8_lossy(&envelope.payload),
                    "peer signalled failure"
                );
                Ok(StageOutcome::Consumed)
            }
            MessageClass::PassThrough => {
                self.counters.passed_through.fetch_add(1, Ordering::Relaxed);
                Ok(StageOutcome::Forward(envelope))
            }
        }
    }
}

/// Terminal stage that hands envelopes to the next protocol layer over a channel.
#[derive(Debug, Clone)]
pub struct ChannelStage {
    sender: mpsc::UnboundedSender<(ConnectionId, Envelope)>,
}

impl ChannelStage {
    /// Creates the stage and the receiver the next layer reads from.
    #[must_use]
    pub fn channel() -> (
        Self,
        mpsc::UnboundedReceiver<(ConnectionId, Envelope)>,
    ) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl PipelineStage for ChannelStage {
    fn handle(&self, ctx: &ConnectionContext, envelope: Envelope) -> GossipResult<StageOutcome> {
        match self.sender.send((ctx.id(), envelope)) {
            Ok(()) => Ok(StageOutcome::Consumed),
            Err(mpsc::error::SendError((_, envelope))) => {
                debug!(conn = %ctx.id(), "next layer gone, forwarding");
                Ok(StageOutcome::Forward(envelope))
            }
        }
    }
}

/// Ordered list of stages shared by all connections of a node.
#[derive(Debug, Default, Clone)]
pub struct Pipeline {
    stages: Vec<Arc<dyn PipelineStage>>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: Arc<dyn PipelineStage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if there are no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs an envelope through every stage until one consumes it.
    ///
    /// Returns [`StageOutcome::Forward`] if it fell off the end of the pipeline.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error raised by a stage.
    pub fn process(&self, ctx: &ConnectionContext, envelope: Envelope) -> GossipResult<StageOutcome> {
        let mut current = envelope;
        for stage in &self.stages {
            match stage.handle(ctx, current)? {
                StageOutcome::Consumed => return Ok(StageOutcome::Consumed),
                StageOutcome::Forward(next) => current = next,
            }
        }
        Ok(StageOutcome::Forward(current))
    }
}
