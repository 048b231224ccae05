//! Filesystem statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free cache counters.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// A point-in-time view of a mounted filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FsStatistics {
    /// Live nodes, including the root.
    pub nodes: usize,
    pub reclaim_pending: usize,
    pub exported: usize,
    /// Remote file handles currently open.
    pub open_handles: usize,
    /// Requests awaiting a reply, over all channels.
    pub outstanding: usize,
    pub reconnects: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl FsStatistics {
    /// Fraction of cache lookups answered locally, 0.0 when there were none.
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let counters = CacheCounters::default();
        counters.record_hit();
        counters.record_hit();
        counters.record_miss();
        assert_eq!(counters.hits(), 2);
        assert_eq!(counters.misses(), 1);
    }

    #[test]
    fn test_hit_rate() {
        assert!((FsStatistics::default().hit_rate() - 0.0).abs() < f64::EPSILON);
        let stats = FsStatistics {
            cache_hits: 3,
            cache_misses: 1,
            ..FsStatistics::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
