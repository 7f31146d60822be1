//! Tracing setup for binaries embedding the gossip layer.

use crate::error::{GossipError, GossipResult};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Installs a global subscriber filtered by `RUST_LOG`, falling back to `default_directive`.
///
/// # Errors
///
/// Returns [`GossipError::Config`] if the directive does not parse or a global
/// subscriber is already installed.
pub fn init_tracing(default_directive: &str, format: LogFormat) -> GossipResult<()> {
    let directive = default_directive
        .parse()
        .map_err(|e| GossipError::Config(format!("invalid log directive {default_directive:?}: {e}")))?;
    let filter = EnvFilter::from_default_env().add_directive(directive);

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    result.map_err(|e| GossipError::Config(format!("tracing already initialised: {e}")))
}
