//! Time management for the collector
//!
//! Provides a clock abstraction so liveness bookkeeping does not depend
//! on the wall clock:
//! - Monotonic clock (production; immune to NTP steps)
//! - Manual clock (tests; advanced explicitly, shareable across threads)
//!
//! Gateway receipt time never leaks into an `EdgeUpdate` - those carry the
//! node's own epoch. These timestamps only drive `last_seen` and eviction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Timestamp in milliseconds since the clock's origin
pub type Timestamp = u64;

/// Milliseconds in one minute, the granularity of idle eviction
pub const MS_PER_MINUTE: u64 = 60_000;

/// Source of time for the system
pub trait TimeSource: Send {
    /// Get current timestamp in milliseconds
    fn now(&self) -> Timestamp;
}

/// Monotonic time source anchored at construction
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Start a clock reading 0 now
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    fn now(&self) -> Timestamp {
        self.origin.elapsed().as_millis() as Timestamp
    }
}

/// Manually driven time source for testing
///
/// Clones share the same counter, so a test can keep one handle and hand
/// the other to an engine running on another thread.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock reading `timestamp`
    pub fn new(timestamp: Timestamp) -> Self {
        Self { now: Arc::new(AtomicU64::new(timestamp)) }
    }

    /// Jump to an absolute timestamp
    pub fn set(&self, timestamp: Timestamp) {
        self.now.store(timestamp, Ordering::SeqCst);
    }

    /// Move forward by `ms` milliseconds
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    /// Move forward by whole minutes
    pub fn advance_minutes(&self, minutes: u64) {
        self.advance(minutes * MS_PER_MINUTE);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Whole minutes elapsed between two timestamps, rounded down
///
/// A clock that appears to run backwards yields zero rather than wrapping.
pub fn whole_minutes_between(earlier: Timestamp, later: Timestamp) -> u64 {
    later.saturating_sub(earlier) / MS_PER_MINUTE
}
