//! Peak and denial tracking alongside the ledger.
//!
//! Lock-free so `stats()` readers never contend with the ledger mutex for
//! these counters.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct PeakTracker {
    peak_bytes: AtomicUsize,
}

impl PeakTracker {
    pub const fn new() -> Self {
        Self {
            peak_bytes: AtomicUsize::new(0),
        }
    }

    /// Record a new live total; updates the peak if higher.
    pub fn record_used(&self, used_bytes: usize) {
        let mut cur = self.peak_bytes.load(Ordering::Relaxed);
        while used_bytes > cur {
            match self.peak_bytes.compare_exchange(
                cur,
                used_bytes,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
    }

    pub fn peak(&self) -> usize {
        self.peak_bytes.load(Ordering::Relaxed)
    }
}

/// Monotonic count of denials or dropped releases.
#[derive(Default)]
pub struct EventCounter {
    count: AtomicUsize,
}

impl EventCounter {
    pub const fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
        }
    }

    /// Count one more, returning the new total.
    pub fn record(&self) -> usize {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of the facade's accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub threshold_bytes: usize,
    pub live_bytes: usize,
    pub live_blocks: usize,
    pub peak_bytes: usize,
    pub denied_requests: usize,
    /// Releases that could not be parked while the ledger was busy; their
    /// bytes stay on the books.
    pub dropped_releases: usize,
}
