//! Bounded, insertion-ordered history of recent work failures.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single captured work failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Name of the worker that observed the failure.
    pub worker: String,
    /// Rendered error message.
    pub message: String,
    /// When the failure was captured.
    pub at: DateTime<Utc>,
}

impl FailureRecord {
    /// Builds a record from an already-rendered message. Rendering happens
    /// at the capture site, inside the worker's unwind protection.
    pub(crate) fn new(worker: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Fixed-capacity FIFO ring of failure records shared by all workers.
///
/// Appends evict the oldest record once the log is full. The log survives
/// pool stops; only the counters are reset on stop.
pub(crate) struct FailureLog {
    capacity: usize,
    entries: Mutex<VecDeque<FailureRecord>>,
}

impl FailureLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends a record, evicting the oldest when at capacity.
    ///
    /// A zero-capacity log stores nothing; failures are still counted and
    /// forwarded to the error handler by the caller.
    pub(crate) fn push(&self, record: FailureRecord) {
        if self.capacity == 0 {
            return;
        }

        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Returns a snapshot of the stored records, oldest first.
    pub(crate) fn recent(&self) -> Vec<FailureRecord> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        entries.iter().cloned().collect()
    }
}
