//! Periodic reconciliation on a dedicated worker thread.
//!
//! The worker waits on a crossbeam channel until the next tick's deadline:
//! reaching it is a tick, [`Command::RunNow`] runs immediately and replies
//! with the outcome without moving the deadline, [`Command::Shutdown`] or a
//! dropped handle ends the loop.
//! Every tick is isolated, so an error or a panic inside a run is logged and
//! the next tick proceeds as usual.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use thiserror::Error;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
use crate::reconcile::{ReconcileError, ReconcileReport, Reconciler};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

const THREAD_NAME: &str = "grocer-reconciler";

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Tick once as soon as the worker starts.
    pub run_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            run_on_start: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to spawn reconciler thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("reconciler thread has stopped")]
    Stopped,
    #[error("reconciler thread panicked")]
    Panicked,
    #[error("reconcile run panicked")]
    RunPanicked,
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Tick counters kept by the worker.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TickStats {
    pub ticks: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Ticks that found the store unavailable or a run already in progress.
    pub skipped: u64,
}

type RunOutcome = Result<ReconcileReport, SchedulerError>;

enum Command {
    RunNow(Sender<RunOutcome>),
    Shutdown,
}

pub struct ReconcileScheduler;

impl ReconcileScheduler {
    /// Spawn the worker thread and return its handle.
    pub fn start(
        reconciler: Arc<Reconciler>,
        config: SchedulerConfig,
    ) -> Result<SchedulerHandle, SchedulerError> {
        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || worker_loop(reconciler, config, rx))?;
        Ok(SchedulerHandle {
            tx,
            handle: Some(handle),
        })
    }
}

/// Owner of the worker thread. Dropping it signals shutdown without waiting.
pub struct SchedulerHandle {
    tx: Sender<Command>,
    handle: Option<JoinHandle<TickStats>>,
}

impl SchedulerHandle {
    /// Run a reconciliation now, on the worker, and wait for its outcome.
    pub fn run_now(&self) -> RunOutcome {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(Command::RunNow(reply_tx))
            .map_err(|_| SchedulerError::Stopped)?;
        reply_rx.recv().map_err(|_| SchedulerError::Stopped)?
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the worker and wait for the tick in flight, if any.
    pub fn shutdown(mut self) -> Result<TickStats, SchedulerError> {
        let _ = self.tx.send(Command::Shutdown);
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| SchedulerError::Panicked),
            None => Ok(TickStats::default()),
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

fn worker_loop(reconciler: Arc<Reconciler>, config: SchedulerConfig, rx: Receiver<Command>) -> TickStats {
    let mut stats = TickStats::default();
    log::info!("reconciler started, interval {:?}", config.interval);

    if config.run_on_start {
        let _ = tick(&reconciler, &mut stats);
    }

    let mut next_tick = Instant::now() + config.interval;
    loop {
        match rx.recv_deadline(next_tick) {
            Err(RecvTimeoutError::Timeout) => {
                let _ = tick(&reconciler, &mut stats);
                next_tick = Instant::now() + config.interval;
            }
            Ok(Command::RunNow(reply)) => {
                let outcome = tick(&reconciler, &mut stats);
                let _ = reply.send(outcome);
            }
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    log::info!(
        "reconciler stopped after {} ticks ({} ok, {} failed, {} skipped)",
        stats.ticks,
        stats.succeeded,
        stats.failed,
        stats.skipped
    );
    stats
}

fn tick(reconciler: &Reconciler, stats: &mut TickStats) -> RunOutcome {
    stats.ticks += 1;

    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::tick_span(stats.ticks).entered();

    match panic::catch_unwind(AssertUnwindSafe(|| reconciler.reconcile())) {
        Ok(Ok(report)) => {
            stats.succeeded += 1;
            Ok(report)
        }
        Ok(Err(e)) if e.is_transient() => {
            stats.skipped += 1;
            log::warn!("tick {} skipped: {e}", stats.ticks);
            Err(e.into())
        }
        Ok(Err(e)) => {
            stats.failed += 1;
            log::error!("tick {} failed: {e}", stats.ticks);
            Err(e.into())
        }
        Err(_) => {
            stats.failed += 1;
            log::error!("tick {} panicked", stats.ticks);
            Err(SchedulerError::RunPanicked)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::StoreError;
    use crate::store::{MemoryStore, Store, UnitOfWork};

    struct Unreachable;

    impl Store for Unreachable {
        fn begin(&self, _budget: Option<Duration>) -> Result<Box<dyn UnitOfWork + '_>, StoreError> {
            Err(StoreError::Connection(
                crate::connection::ConnectionError::InvalidConnectionString("down".to_string()),
            ))
        }
    }

    struct Exploding;

    impl Store for Exploding {
        fn begin(&self, _budget: Option<Duration>) -> Result<Box<dyn UnitOfWork + '_>, StoreError> {
            panic!("store exploded");
        }
    }

    fn idle() -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(3600),
            run_on_start: false,
        }
    }

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert!(config.run_on_start);
    }

    #[test]
    fn test_run_now_returns_report() {
        let reconciler = Arc::new(Reconciler::new(Arc::new(MemoryStore::new())));
        let handle = ReconcileScheduler::start(reconciler, idle()).unwrap();

        let report = handle.run_now().unwrap();
        assert!(report.is_noop());

        let stats = handle.shutdown().unwrap();
        assert_eq!(stats.ticks, 1);
        assert_eq!(stats.succeeded, 1);
    }

    #[test]
    fn test_unavailable_store_does_not_stop_the_loop() {
        let reconciler = Arc::new(Reconciler::new(Arc::new(Unreachable)));
        let handle = ReconcileScheduler::start(reconciler, idle()).unwrap();

        assert!(handle.run_now().is_err());
        assert!(handle.run_now().is_err());
        assert!(handle.is_running());

        let stats = handle.shutdown().unwrap();
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn test_panicking_run_is_contained() {
        let reconciler = Arc::new(Reconciler::new(Arc::new(Exploding)));
        let handle = ReconcileScheduler::start(reconciler.clone(), idle()).unwrap();

        assert!(matches!(handle.run_now(), Err(SchedulerError::RunPanicked)));
        assert!(!reconciler.is_running());
        assert!(matches!(handle.run_now(), Err(SchedulerError::RunPanicked)));

        let stats = handle.shutdown().unwrap();
        assert_eq!(stats.failed, 2);
    }

    #[test]
    fn test_interval_ticks_and_run_on_start() {
        let reconciler = Arc::new(Reconciler::new(Arc::new(MemoryStore::new())));
        let handle = ReconcileScheduler::start(
            reconciler,
            SchedulerConfig {
                interval: Duration::from_millis(10),
                run_on_start: true,
            },
        )
        .unwrap();
        thread::sleep(Duration::from_millis(100));
        let stats = handle.shutdown().unwrap();
        assert!(stats.ticks >= 2, "expected several ticks, got {}", stats.ticks);
        assert_eq!(stats.ticks, stats.succeeded);
    }

    #[test]
    fn test_run_now_does_not_postpone_interval_ticks() {
        let reconciler = Arc::new(Reconciler::new(Arc::new(MemoryStore::new())));
        let handle = ReconcileScheduler::start(
            reconciler,
            SchedulerConfig {
                interval: Duration::from_millis(100),
                run_on_start: false,
            },
        )
        .unwrap();

        let mut requested = 0;
        let until = Instant::now() + Duration::from_millis(450);
        while Instant::now() < until {
            handle.run_now().unwrap();
            requested += 1;
            thread::sleep(Duration::from_millis(20));
        }

        let stats = handle.shutdown().unwrap();
        assert!(
            stats.ticks >= requested + 2,
            "{} ticks for {requested} requested runs",
            stats.ticks
        );
    }
}
