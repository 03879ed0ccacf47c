//! Shared cycle and error counters updated concurrently by all workers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared state for tracking pool activity.
///
/// `cycles` counts every completed work attempt, successful or not.
/// `errors` counts the attempts that failed. Both are monotonic while
/// the pool runs and are zeroed together on a successful stop.
pub(crate) struct PoolCounters {
    cycles: AtomicU64,
    errors: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn new() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns `(cycles, errors)` as of the call.
    ///
    /// Errors are loaded first: every error increment is preceded by the
    /// increment of the cycle it belongs to, so this load order keeps
    /// `cycles >= errors` in every snapshot a reader can observe.
    pub(crate) fn snapshot(&self) -> (u64, u64) {
        let errors = self.errors.load(Ordering::SeqCst);
        let cycles = self.cycles.load(Ordering::SeqCst);
        (cycles, errors)
    }

    pub(crate) fn reset(&self) {
        self.cycles.store(0, Ordering::SeqCst);
        self.errors.store(0, Ordering::SeqCst);
    }
}
