//! Time source capability for storage timestamps

use std::time::{SystemTime, UNIX_EPOCH};

/// One-method time source, injected so stores can be tested with a
/// fixed clock
pub trait Clock: Send + Sync {
    /// Current time as Unix seconds
    fn now(&self) -> u64;
}

/// Wall-clock time
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or(0)
    }
}
