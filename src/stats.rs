//! Node-wide bundle-lifecycle counters (section 4.10), exposed read-only via
//! the management API's `/stats` route.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct StatsSnapshot {
    pub incoming: u64,
    pub duplicates: u64,
    pub outgoing: u64,
    pub delivered: u64,
    pub failed: u64,
    pub broken: u64,
    pub stored: u64,
}

#[derive(Default)]
pub struct NodeStats {
    incoming: AtomicU64,
    duplicates: AtomicU64,
    outgoing: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    broken: AtomicU64,
}

impl NodeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_incoming(&self) {
        self.incoming.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outgoing(&self) {
        self.outgoing.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broken(&self) {
        self.broken.fetch_add(1, Ordering::Relaxed);
    }

    /// `stored` is not an independent counter, it's read live from the store
    /// at snapshot time, so the caller passes it in.
    pub fn snapshot(&self, stored: u64) -> StatsSnapshot {
        StatsSnapshot {
            incoming: self.incoming.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            outgoing: self.outgoing.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            broken: self.broken.load(Ordering::Relaxed),
            stored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_independently() {
        let stats = NodeStats::new();
        stats.record_incoming();
        stats.record_incoming();
        stats.record_delivered();
        let snap = stats.snapshot(0);
        assert_eq!(snap.incoming, 2);
        assert_eq!(snap.delivered, 1);
        assert_eq!(snap.duplicates, 0);
    }
}
