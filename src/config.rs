//! Pool construction parameters.

use std::time::Duration;

/// Default capacity of the failure history.
pub const DEFAULT_MAX_HISTORY: usize = 32;

/// Default grace period before a worker is forcibly terminated on stop.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(1);

/// Configuration for a [`WorkerPool`](crate::WorkerPool).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker tasks to spawn. Must be at least 1.
    pub workers: usize,
    /// Maximum number of failure records retained; the oldest is evicted
    /// first. Zero disables the history without disabling error counting.
    pub max_history: usize,
    /// Prefix for worker names; workers are named `"<prefix>-1"` onward.
    pub name_prefix: String,
    /// How long `stop()` waits for each worker to exit on its own before
    /// aborting it.
    pub stop_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            max_history: DEFAULT_MAX_HISTORY,
            name_prefix: default_name_prefix(),
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

impl PoolConfig {
    /// Creates a configuration with the specified number of workers.
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    /// Sets the failure history capacity.
    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    /// Sets the worker name prefix.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Sets the grace period for cooperative worker shutdown.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }
}

/// Generates a unique default prefix so that workers of unrelated pools
/// remain distinguishable in logs.
fn default_name_prefix() -> String {
    use rand::RngExt;

    let mut rng = rand::rng();
    format!("pool-{:08x}", rng.random::<u32>())
}
