//! Time source abstraction.
//!
//! The gate's staleness check and the sync engine's retention sweeps both
//! compare against "now"; injecting the clock keeps those paths
//! deterministic under test.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Provides the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
    /// Current epoch milliseconds.
    fn now_epoch_ms(&self) -> i64;
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn now_epoch_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;
