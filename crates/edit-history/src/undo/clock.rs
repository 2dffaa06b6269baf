#![forbid(unsafe_code)]

//! Time sources for coalescing buckets.
//!
//! Keyed commands are bucketed by `floor(elapsed / window)`. The history
//! reads elapsed time through [`Clock`] so tests can drive bucket
//! boundaries deterministically with [`ManualClock`].

use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use web_time::Instant;

/// A monotonic time source measured from a fixed origin.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin.
    fn elapsed(&self) -> Duration;
}

/// Wall-clock time since an origin instant.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Clock whose origin is shared by every `process()` clock in this
    /// process, so buckets line up across histories.
    #[must_use]
    pub fn process() -> Self {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        Self {
            origin: *ORIGIN.get_or_init(Instant::now),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::process()
    }
}

impl Clock for MonotonicClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("elapsed", &self.elapsed())
            .finish()
    }
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to an absolute elapsed time.
    pub fn set(&self, elapsed: Duration) {
        self.nanos.store(saturating_nanos(elapsed), Ordering::Relaxed);
    }

    /// Move time forward by `step`.
    pub fn advance(&self, step: Duration) {
        let step = saturating_nanos(step);
        let _ = self
            .nanos
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |now| {
                Some(now.saturating_add(step))
            });
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }
}

/// Index of the `window`-wide bucket containing `elapsed`.
///
/// A zero window puts every distinct nanosecond in its own bucket.
#[must_use]
pub fn bucket_index(elapsed: Duration, window: Duration) -> u64 {
    let width = window.as_nanos().max(1);
    u64::try_from(elapsed.as_nanos() / width).unwrap_or(u64::MAX)
}

fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
