//! Write-only metrics surface of the block store

use std::sync::atomic::{AtomicU64, Ordering};

/// Sink for store events. Ticked outside any transaction, so counts may be
/// lost on crash.
pub trait StorageMetrics: Send + Sync {
    /// A main-shard block acquired its aggregate proof
    fn record_main_block_proved(&self);
}

/// In-process atomic counters, readable for export
#[derive(Default)]
pub struct StorageCounters {
    main_blocks_proved: AtomicU64,
}

impl StorageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn main_blocks_proved(&self) -> u64 {
        self.main_blocks_proved.load(Ordering::Relaxed)
    }
}

impl StorageMetrics for StorageCounters {
    fn record_main_block_proved(&self) {
        self.main_blocks_proved.fetch_add(1, Ordering::Relaxed);
    }
}

/// Discards every event
pub struct NoopMetrics;

impl StorageMetrics for NoopMetrics {
    fn record_main_block_proved(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let counters = StorageCounters::new();
        assert_eq!(counters.main_blocks_proved(), 0);
        counters.record_main_block_proved();
        counters.record_main_block_proved();
        assert_eq!(counters.main_blocks_proved(), 2);
    }
}
