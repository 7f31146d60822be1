//! Gossip counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated from every connection task.
#[derive(Debug, Default)]
pub struct GossipStats {
    announcements_received: AtomicU64,
    announcements_stored: AtomicU64,
    announcements_duplicate: AtomicU64,
    announcements_rejected: AtomicU64,
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    failed_deliveries: AtomicU64,
    batch_items_learned: AtomicU64,
    decode_errors: AtomicU64,
}

/// Point-in-time copy of [`GossipStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Announce messages received.
    pub announcements_received: u64,
    /// Announcements that were new and stored.
    pub announcements_stored: u64,
    /// Announcements already known.
    pub announcements_duplicate: u64,
    /// Announcements that failed signature or freshness checks.
    pub announcements_rejected: u64,
    /// Fan-out waves started.
    pub broadcasts: u64,
    /// Individual envelopes queued to peers during fan-out.
    pub deliveries: u64,
    /// Individual fan-out sends that failed.
    pub failed_deliveries: u64,
    /// Batch items absorbed into local knowledge.
    pub batch_items_learned: u64,
    /// Gossip payloads that could not be decoded.
    pub decode_errors: u64,
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        #[doc = concat!("Increments `", stringify!($field), "`.")]
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl GossipStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_announcement_received, announcements_received);
    counter!(record_announcement_stored, announcements_stored);
    counter!(record_announcement_duplicate, announcements_duplicate);
    counter!(record_announcement_rejected, announcements_rejected);
    counter!(record_broadcast, broadcasts);
    counter!(record_batch_item_learned, batch_items_learned);
    counter!(record_decode_error, decode_errors);

    /// Records the per-peer outcome of one fan-out wave.
    pub fn record_deliveries(&self, delivered: usize, failed: usize) {
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        self.failed_deliveries
            .fetch_add(failed as u64, Ordering::Relaxed);
    }

    /// Returns a copy of the current values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            announcements_received: load(&self.announcements_received),
            announcements_stored: load(&self.announcements_stored),
            announcements_duplicate: load(&self.announcements_duplicate),
            announcements_rejected: load(&self.announcements_rejected),
            broadcasts: load(&self.broadcasts),
            deliveries: load(&self.deliveries),
            failed_deliveries: load(&self.failed_deliveries),
            batch_items_learned: load(&self.batch_items_learned),
            decode_errors: load(&self.decode_errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        assert_eq!(GossipStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn counters_accumulate() {
        let stats = GossipStats::new();
        stats.record_announcement_received();
        stats.record_announcement_received();
        stats.record_announcement_stored();
        stats.record_deliveries(3, 1);
        stats.record_deliveries(2, 0);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.announcements_received, 2);
        assert_eq!(snapshot.announcements_stored, 1);
        assert_eq!(snapshot.deliveries, 5);
        assert_eq!(snapshot.failed_deliveries, 1);
    }
}
