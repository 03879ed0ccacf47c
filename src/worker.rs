//! Worker identity and the repeating work loop.
//!
//! Each worker runs an indefinite cycle: invoke the work function, record
//! the outcome, pause, check for cancellation. All caller code (the work
//! function, its error's `Display` impl, the error handler) runs behind
//! unwind boundaries, so no failure can terminate the worker.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::anyhow;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::counters::PoolCounters;
use crate::failure_log::{FailureLog, FailureRecord};

/// Caller-supplied unit of work, executed once per cycle.
pub(crate) type WorkFn = dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// Caller-supplied callback invoked with each captured failure and the
/// name of the worker that observed it.
pub(crate) type ErrorHandler = dyn Fn(&anyhow::Error, &str) + Send + Sync;

/// Shared, replaceable error-handler slot read by every worker.
pub(crate) type HandlerSlot = Arc<RwLock<Option<Arc<ErrorHandler>>>>;

/// Formats the 1-based worker name for an index.
pub(crate) fn worker_name(prefix: &str, index: usize) -> String {
    format!("{}-{}", prefix, index + 1)
}

/// A single worker executing the repeating work loop.
pub(crate) struct Worker {
    /// Observable identity, `"<prefix>-<1-based index>"`.
    name: String,
    /// Delay between cycles; zero means immediate repetition.
    pause: Duration,
    /// Shared work function.
    work: Arc<WorkFn>,
    /// Shared error-handler slot.
    handler: HandlerSlot,
    /// Shared cycle/error counters.
    counters: Arc<PoolCounters>,
    /// Shared failure history.
    failures: Arc<FailureLog>,
    /// Receiver for the shutdown signal.
    shutdown_rx: broadcast::Receiver<()>,
}

impl Worker {
    pub(crate) fn new(
        name: String,
        pause: Duration,
        work: Arc<WorkFn>,
        handler: HandlerSlot,
        counters: Arc<PoolCounters>,
        failures: Arc<FailureLog>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name,
            pause,
            work,
            handler,
            counters,
            failures,
            shutdown_rx,
        }
    }

    /// Main worker loop.
    ///
    /// Repeats until a shutdown signal arrives. Cancellation is checked at
    /// the loop boundary; a non-zero pause is interrupted early by the
    /// signal.
    pub(crate) async fn run(mut self) {
        info!(worker = %self.name, "Worker started");

        loop {
            self.run_cycle().await;

            if self.pause.is_zero() {
                // Check for shutdown signal (non-blocking)
                match self.shutdown_rx.try_recv() {
                    Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                        info!(worker = %self.name, "Worker received shutdown signal");
                        break;
                    }
                    Err(broadcast::error::TryRecvError::Lagged(_)) => {
                        // The only message ever broadcast is shutdown, so
                        // lagging behind one still means stop.
                        break;
                    }
                    Err(broadcast::error::TryRecvError::Empty) => {
                        // Yield so sibling workers and the shutdown path
                        // make progress even on a zero pause.
                        tokio::task::yield_now().await;
                    }
                }
            } else {
                tokio::select! {
                    _ = self.shutdown_rx.recv() => {
                        info!(worker = %self.name, "Worker received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(self.pause) => {}
                }
            }
        }

        info!(worker = %self.name, "Worker stopped");
    }

    /// Executes one cycle: one work invocation plus its accounting.
    ///
    /// The cycle counts the attempt regardless of outcome and is recorded
    /// before any error accounting, so `cycles >= errors` holds for every
    /// concurrent status read.
    async fn run_cycle(&self) {
        let outcome = self.execute_work().await;
        self.counters.record_cycle();

        if let Err(error) = outcome {
            self.counters.record_error();
            let message = render_error(&error);
            debug!(worker = %self.name, error = %message, "Work iteration failed");
            self.failures.push(FailureRecord::new(&self.name, message));
            self.invoke_handler(&error);
        }
    }

    /// Runs one work invocation, converting panics into errors.
    ///
    /// Both halves can unwind: the closure call that produces the future
    /// and the future itself.
    async fn execute_work(&self) -> anyhow::Result<()> {
        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| (self.work)())) {
            Ok(future) => future,
            Err(payload) => return Err(panic_error(payload)),
        };

        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => Err(panic_error(payload)),
        }
    }

    /// Invokes the error handler, if one is set.
    ///
    /// A failure inside the handler is discarded here: not counted, not
    /// logged, never propagated.
    fn invoke_handler(&self, error: &anyhow::Error) {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if let Some(handler) = handler {
            let _ = std::panic::catch_unwind(AssertUnwindSafe(|| handler(error, &self.name)));
        }
    }
}

/// Renders a work error to its message.
///
/// The `Display` impl is caller code and runs behind the same unwind
/// protection as the work itself.
fn render_error(error: &anyhow::Error) -> String {
    match std::panic::catch_unwind(AssertUnwindSafe(|| error.to_string())) {
        Ok(message) => message,
        Err(payload) => match panic_message(payload.as_ref()) {
            Some(message) => format!("error display panicked: {message}"),
            None => "error display panicked".to_string(),
        },
    }
}

/// Renders a panic payload into an error, preserving string messages.
fn panic_error(payload: Box<dyn Any + Send>) -> anyhow::Error {
    match panic_message(payload.as_ref()) {
        Some(message) => anyhow!("work panicked: {message}"),
        None => anyhow!("work panicked"),
    }
}

/// Extracts the string message from a panic payload, if it carries one.
fn panic_message(payload: &(dyn Any + Send)) -> Option<&str> {
    if let Some(message) = payload.downcast_ref::<&str>() {
        Some(*message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        Some(message.as_str())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_worker(
        work: Arc<WorkFn>,
        handler: HandlerSlot,
    ) -> (
        Worker,
        Arc<PoolCounters>,
        Arc<FailureLog>,
        broadcast::Sender<()>,
    ) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let counters = Arc::new(PoolCounters::new());
        let failures = Arc::new(FailureLog::new(8));

        let worker = Worker::new(
            "test-1".to_string(),
            Duration::ZERO,
            work,
            handler,
            Arc::clone(&counters),
            Arc::clone(&failures),
            shutdown_rx,
        );

        (worker, counters, failures, shutdown_tx)
    }

    fn empty_handler() -> HandlerSlot {
        Arc::new(RwLock::new(None))
    }

    fn handler_slot<H>(handler: H) -> HandlerSlot
    where
        H: Fn(&anyhow::Error, &str) + Send + Sync + 'static,
    {
        Arc::new(RwLock::new(Some(Arc::new(handler) as Arc<ErrorHandler>)))
    }

    #[test]
    fn test_worker_name_is_one_based() {
        assert_eq!(worker_name("foo", 0), "foo-1");
        assert_eq!(worker_name("foo", 2), "foo-3");
    }

    #[test]
    fn test_panic_error_preserves_message() {
        let error = panic_error(Box::new("boom"));
        assert!(error.to_string().contains("boom"));

        let error = panic_error(Box::new("went wrong".to_string()));
        assert!(error.to_string().contains("went wrong"));

        let error = panic_error(Box::new(42_u32));
        assert_eq!(error.to_string(), "work panicked");
    }

    /// Error type whose rendering itself blows up.
    #[derive(Debug)]
    struct BrokenDisplay;

    impl std::fmt::Display for BrokenDisplay {
        fn fmt(&self, _f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            panic!("display bug")
        }
    }

    impl std::error::Error for BrokenDisplay {}

    #[test]
    fn test_render_error_survives_panicking_display() {
        assert_eq!(render_error(&anyhow!("plain")), "plain");

        let message = render_error(&anyhow::Error::new(BrokenDisplay));
        assert!(message.contains("display panicked"));
        assert!(message.contains("display bug"));
    }

    #[tokio::test]
    async fn test_error_display_panic_is_contained() {
        let work: Arc<WorkFn> =
            Arc::new(|| async { Err(anyhow::Error::new(BrokenDisplay)) }.boxed());
        let (worker, counters, failures, _shutdown_tx) = build_worker(work, empty_handler());

        worker.run_cycle().await;
        worker.run_cycle().await;

        // Both cycles complete their accounting despite the Display panic.
        assert_eq!(counters.snapshot(), (2, 2));
        let recent = failures.recent();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].message.contains("display panicked"));
    }

    #[tokio::test]
    async fn test_successful_cycle_counts_no_error() {
        let work: Arc<WorkFn> = Arc::new(|| async { Ok(()) }.boxed());
        let (worker, counters, failures, _shutdown_tx) = build_worker(work, empty_handler());

        worker.run_cycle().await;

        assert_eq!(counters.snapshot(), (1, 0));
        assert!(failures.recent().is_empty());
    }

    #[tokio::test]
    async fn test_failed_cycle_is_counted_and_logged() {
        let work: Arc<WorkFn> = Arc::new(|| async { Err(anyhow!("no route")) }.boxed());
        let (worker, counters, failures, _shutdown_tx) = build_worker(work, empty_handler());

        worker.run_cycle().await;
        worker.run_cycle().await;

        assert_eq!(counters.snapshot(), (2, 2));
        let recent = failures.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].worker, "test-1");
        assert_eq!(recent[0].message, "no route");
    }

    #[tokio::test]
    async fn test_work_panic_is_recorded_as_error() {
        let work: Arc<WorkFn> = Arc::new(|| async { panic!("exploded") }.boxed());
        let (worker, counters, failures, _shutdown_tx) = build_worker(work, empty_handler());

        worker.run_cycle().await;

        assert_eq!(counters.snapshot(), (1, 1));
        assert!(failures.recent()[0].message.contains("exploded"));
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let work: Arc<WorkFn> = Arc::new(|| async { Err(anyhow!("boom")) }.boxed());
        let handler = handler_slot(|_, _| panic!("handler bug"));
        let (worker, counters, failures, _shutdown_tx) = build_worker(work, handler);

        worker.run_cycle().await;
        worker.run_cycle().await;

        // Handler failures are invisible: the error count tracks only the
        // work failures and the log holds only the work errors.
        assert_eq!(counters.snapshot(), (2, 2));
        assert_eq!(failures.recent().len(), 2);
        assert_eq!(failures.recent()[0].message, "boom");
    }

    #[tokio::test]
    async fn test_handler_receives_error_and_worker_name() {
        use std::sync::Mutex;

        let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_by_handler = Arc::clone(&seen);

        let work: Arc<WorkFn> = Arc::new(|| async { Err(anyhow!("timeout")) }.boxed());
        let handler = handler_slot(move |error, worker| {
            seen_by_handler
                .lock()
                .unwrap()
                .push((error.to_string(), worker.to_string()));
        });
        let (worker, _counters, _failures, _shutdown_tx) = build_worker(work, handler);

        worker.run_cycle().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], ("timeout".to_string(), "test-1".to_string()));
    }
}
