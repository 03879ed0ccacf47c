//! everloop: a self-healing repeating worker pool.
//!
//! A fixed number of workers each execute a caller-supplied unit of work
//! in an infinite loop, separated by a configurable pause. Failures are
//! isolated per iteration: a failing work invocation is counted, recorded
//! in a bounded history, and forwarded to an optional error handler, and
//! the worker keeps cycling. Neither a returned error, nor a panic in the
//! work function, nor a failing error handler terminates a worker.
//!
//! # Components
//!
//! - [`WorkerPool`]: start/stop lifecycle, status reporting, teardown
//! - [`PoolConfig`]: worker count, history capacity, naming, stop grace
//! - [`PoolStatus`]: snapshot rendered as `"<workers>/<cycles>/<errors>"`
//! - [`FailureRecord`]: captured failure with worker name and timestamp
//!
//! Workers are tokio tasks spawned onto the ambient runtime: `start` does
//! not block, and `stop` returns only once every worker has terminated,
//! aborting workers that outlive the configured grace period. Stopping
//! resets the cycle and error counters; the failure history is kept.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use everloop::{PoolConfig, WorkerPool};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), everloop::PoolError> {
//! let config = PoolConfig::new(2).with_name_prefix("fetch");
//! let mut pool = WorkerPool::new(config, || async {
//!     // One unit of work per cycle.
//!     Ok(())
//! })?;
//!
//! pool.on_error(|error, worker| {
//!     eprintln!("{worker}: {error}");
//! });
//!
//! pool.start(Duration::from_millis(10))?;
//! tokio::time::sleep(Duration::from_millis(50)).await;
//!
//! pool.stop().await?;
//! assert_eq!(pool.to_string(), "0/0/0");
//! # Ok(())
//! # }
//! ```

pub mod config;
mod counters;
mod failure_log;
pub mod pool;
mod worker;

pub use config::{DEFAULT_MAX_HISTORY, DEFAULT_STOP_GRACE, PoolConfig};
pub use failure_log::FailureRecord;
pub use pool::{PoolError, PoolStatus, WorkerPool};
