//! The worker pool: lifecycle, status reporting, and teardown.
//!
//! A pool owns a fixed number of workers that repeatedly execute one
//! shared work function. Starting spawns the workers; stopping signals
//! them, waits until every one has terminated, and resets the counters.
//!
//! # Features
//!
//! - Fixed worker count with 1-based worker naming
//! - Graceful shutdown with broadcast channel and abort fallback
//! - Per-iteration failure isolation, independently for work and handler
//! - Cycle/error counting and a bounded failure history

use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::PoolConfig;
use crate::counters::PoolCounters;
use crate::failure_log::{FailureLog, FailureRecord};
use crate::worker::{HandlerSlot, WorkFn, Worker, worker_name};

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool was configured with zero workers.
    #[error("Worker count must be at least 1, got {0}")]
    InvalidWorkerCount(usize),

    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,
}

/// Point-in-time snapshot of pool activity.
///
/// Renders via `Display` in the canonical form
/// `"<workers>/<cycles>/<errors>"`, e.g. `"6/230/23"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of workers currently running.
    pub workers: usize,
    /// Work attempts completed since the last successful stop.
    pub cycles: u64,
    /// Failed attempts since the last successful stop.
    pub errors: u64,
}

impl PoolStatus {
    /// Returns the share of cycles that failed, as a percentage.
    pub fn failure_rate(&self) -> f64 {
        if self.cycles == 0 {
            return 0.0;
        }
        (self.errors as f64 / self.cycles as f64) * 100.0
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.workers, self.cycles, self.errors)
    }
}

/// A fixed-size pool of workers repeatedly executing one work function.
///
/// The pool is Stopped on construction. `start` spawns the workers onto
/// the ambient tokio runtime; `stop` tears them down synchronously from
/// the caller's point of view: it only returns once no worker is still
/// executing. The failure history survives stops; the counters do not.
pub struct WorkerPool {
    config: PoolConfig,
    work: Arc<WorkFn>,
    handler: HandlerSlot,
    counters: Arc<PoolCounters>,
    failures: Arc<FailureLog>,
    shutdown_tx: broadcast::Sender<()>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Creates a new pool around a work function.
    ///
    /// The work function is shared by all workers and executed once per
    /// cycle; it reports failure through its `Result`. Panics inside it
    /// are also captured and treated as failures.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidWorkerCount` if `config.workers` is zero.
    pub fn new<F, Fut>(config: PoolConfig, work: F) -> Result<Self, PoolError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if config.workers == 0 {
            return Err(PoolError::InvalidWorkerCount(config.workers));
        }

        let max_history = config.max_history;

        // Create broadcast channel for shutdown signal
        // Buffer size of 1 is sufficient since we only send once per stop
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            work: Arc::new(move || work().boxed()),
            handler: Arc::new(RwLock::new(None)),
            counters: Arc::new(PoolCounters::new()),
            failures: Arc::new(FailureLog::new(max_history)),
            shutdown_tx,
            workers: Vec::new(),
        })
    }

    /// Registers the error handler, replacing any previous one.
    ///
    /// The handler is invoked with each captured work failure and the name
    /// of the worker that observed it. It takes effect on the next failure,
    /// including in workers already running. Returns the pool for chaining.
    pub fn on_error<H>(&mut self, handler: H) -> &mut Self
    where
        H: Fn(&anyhow::Error, &str) + Send + Sync + 'static,
    {
        *self
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
        self
    }

    /// Starts the pool, spawning one worker task per configured worker.
    ///
    /// Workers begin cycling immediately and independently; `pause`
    /// separates consecutive cycles within each worker. The call does not
    /// block on worker progress.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub fn start(&mut self, pause: Duration) -> Result<(), PoolError> {
        if !self.workers.is_empty() {
            return Err(PoolError::AlreadyRunning);
        }

        for index in 0..self.config.workers {
            let worker = Worker::new(
                worker_name(&self.config.name_prefix, index),
                pause,
                Arc::clone(&self.work),
                Arc::clone(&self.handler),
                Arc::clone(&self.counters),
                Arc::clone(&self.failures),
                self.shutdown_tx.subscribe(),
            );

            let handle = tokio::spawn(async move {
                worker.run().await;
            });

            self.workers.push(handle);
        }

        info!(workers = self.config.workers, "Worker pool started");

        Ok(())
    }

    /// Stops the pool and waits until every worker has terminated.
    ///
    /// Signals all workers, then joins each one. A worker that does not
    /// exit within the configured grace period is aborted and awaited
    /// again, so no worker is still executing when this returns. The
    /// counters are reset to zero; the failure history is kept.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::NotRunning` if the pool is not running.
    pub async fn stop(&mut self) -> Result<(), PoolError> {
        if self.workers.is_empty() {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Send shutdown signal to all workers
        // Ignore send error - workers may have already stopped
        let _ = self.shutdown_tx.send(());

        for (index, mut handle) in self.workers.drain(..).enumerate() {
            match tokio::time::timeout(self.config.stop_grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
                Err(_) => {
                    warn!(
                        worker = %worker_name(&self.config.name_prefix, index),
                        grace = ?self.config.stop_grace,
                        "Worker did not stop within grace period, aborting"
                    );
                    handle.abort();
                    if let Err(e) = handle.await {
                        if !e.is_cancelled() {
                            error!(error = %e, "Worker task panicked during shutdown");
                        }
                    }
                }
            }
        }

        self.counters.reset();
        info!("Worker pool shutdown complete");

        Ok(())
    }

    /// Returns a snapshot of running workers, cycles, and errors.
    ///
    /// Non-blocking and valid in any state. Snapshots always satisfy
    /// `cycles >= errors`.
    pub fn status(&self) -> PoolStatus {
        let (cycles, errors) = self.counters.snapshot();
        PoolStatus {
            workers: self.workers.len(),
            cycles,
            errors,
        }
    }

    /// Returns the retained failure records, oldest first.
    ///
    /// At most `max_history` records are kept; stops do not clear them.
    pub fn recent_failures(&self) -> Vec<FailureRecord> {
        self.failures.recent()
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Returns the configured number of workers.
    pub fn worker_count(&self) -> usize {
        self.config.workers
    }

    /// Returns the names workers carry while the pool runs.
    pub fn worker_names(&self) -> Vec<String> {
        (0..self.config.workers)
            .map(|index| worker_name(&self.config.name_prefix, index))
            .collect()
    }
}

impl fmt::Display for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status())
    }
}

impl Drop for WorkerPool {
    /// Aborts any workers still running so a dropped pool leaks no tasks.
    ///
    /// Not a substitute for `stop`: drop cannot wait for termination and
    /// does not reset the counters.
    fn drop(&mut self) {
        for handle in &self.workers {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_display() {
        let err = PoolError::AlreadyRunning;
        assert!(err.to_string().contains("already running"));

        let err = PoolError::NotRunning;
        assert!(err.to_string().contains("not running"));

        let err = PoolError::InvalidWorkerCount(0);
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_status_display() {
        let status = PoolStatus {
            workers: 6,
            cycles: 230,
            errors: 23,
        };

        assert_eq!(status.to_string(), "6/230/23");
    }

    #[test]
    fn test_failure_rate() {
        let status = PoolStatus {
            workers: 0,
            cycles: 0,
            errors: 0,
        };
        assert!((status.failure_rate() - 0.0).abs() < f64::EPSILON);

        let status = PoolStatus {
            workers: 4,
            cycles: 100,
            errors: 25,
        };
        assert!((status.failure_rate() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_new_rejects_zero_workers() {
        let result = WorkerPool::new(PoolConfig::new(0), || async { Ok(()) });

        assert!(matches!(result, Err(PoolError::InvalidWorkerCount(0))));
    }

    #[test]
    fn test_new_pool_is_stopped_with_zeroed_status() {
        let pool = WorkerPool::new(PoolConfig::new(3), || async { Ok(()) }).unwrap();

        assert!(!pool.is_running());
        assert_eq!(pool.worker_count(), 3);
        assert_eq!(pool.to_string(), "0/0/0");
    }

    #[test]
    fn test_worker_names_are_one_based() {
        let config = PoolConfig::new(3).with_name_prefix("foo");
        let pool = WorkerPool::new(config, || async { Ok(()) }).unwrap();

        assert_eq!(pool.worker_names(), vec!["foo-1", "foo-2", "foo-3"]);
    }
}
