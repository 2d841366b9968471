//! Time sources
//!
//! The ledger never reads wall time directly; it asks a [`ClockSource`] once
//! per operation and uses that value throughout.

use crate::types::Timestamp;
use std::sync::atomic::{AtomicI64, Ordering};

/// Supplies the current logical time in unix seconds
pub trait ClockSource: Send + Sync {
    /// Current time. Must be monotonically non-decreasing.
    fn now(&self) -> Timestamp;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp()
    }
}

/// Externally driven clock, the in-process stand-in for block time
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create clock at `start`
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    /// Advance by `seconds`, saturating at `i64::MAX`. Negative values are ignored.
    pub fn advance(&self, seconds: i64) -> Timestamp {
        let step = seconds.max(0);
        let previous = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                Some(t.saturating_add(step))
            })
            .unwrap_or_else(|t| t);
        previous.saturating_add(step)
    }

    /// Move to `target` if it is not in the past
    pub fn set(&self, target: Timestamp) -> Timestamp {
        self.now.fetch_max(target, Ordering::SeqCst).max(target)
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
