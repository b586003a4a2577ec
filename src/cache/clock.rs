//! Logical clock used to stamp writes and deletes.

use crate::types::Timestamp;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock seconds plus a per-instance offset.
///
/// The offset lets a cache instance pretend to live in the past or the
/// future, which is how out-of-order writers are simulated.
#[derive(Debug, Default)]
pub struct LogicalClock {
    offset: AtomicI64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offset(offset: i64) -> Self {
        Self {
            offset: AtomicI64::new(offset),
        }
    }

    /// Current logical time, in seconds.
    pub fn now(&self) -> Timestamp {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        wall + self.offset()
    }

    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::Relaxed)
    }

    pub fn set_offset(&self, offset: i64) {
        self.offset.store(offset, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_shifts_time() {
        let clock = LogicalClock::new();
        let base = clock.now();

        clock.set_offset(-2000);
        let shifted = clock.now();
        assert!(base - shifted >= 1999 && base - shifted <= 2001);
        assert_eq!(clock.offset(), -2000);

        let future = LogicalClock::with_offset(100);
        assert!(future.now() >= base + 99);
    }
}
