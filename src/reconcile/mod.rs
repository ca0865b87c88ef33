//! Inventory/archive reconciliation.
//!
//! A run opens one unit of work, scans `products`, `inventories` and
//! `archived`, plans the differences with [`plan`] and applies them one
//! savepoint at a time. A change rejected for row-level reasons is rolled
//! back to its savepoint and counted as skipped; anything else rolls back
//! the whole run, leaving the derived tables as the previous run left
//! them. Runs never overlap: a second caller gets
//! [`ReconcileError::AlreadyRunning`].

mod plan;
mod report;

pub use plan::plan;
pub use report::ReconcileReport;

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::executor::StoreError;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
use crate::store::{Store, UnitOfWork};

/// Default time budget of one run.
pub const DEFAULT_RUN_BUDGET: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("a reconciliation run is already in progress")]
    AlreadyRunning,
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
    #[error("run exceeded its budget of {0:?}")]
    BudgetExceeded(Duration),
    #[error("reconciliation failed: {0}")]
    Store(#[source] StoreError),
}

impl ReconcileError {
    /// True for failures the next tick is expected to get past on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReconcileError::AlreadyRunning | ReconcileError::StoreUnavailable(_)
        )
    }

    fn label(&self) -> &'static str {
        match self {
            ReconcileError::AlreadyRunning => "already_running",
            ReconcileError::StoreUnavailable(_) => "store_unavailable",
            ReconcileError::BudgetExceeded(_) => "budget_exceeded",
            ReconcileError::Store(_) => "store",
        }
    }
}

/// Clears the run-in-progress flag when the run ends, panics included.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Brings `inventories` and `archived` in line with `products`.
pub struct Reconciler {
    store: Arc<dyn Store>,
    budget: Duration,
    running: AtomicBool,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            budget: DEFAULT_RUN_BUDGET,
            running: AtomicBool::new(false),
        }
    }

    /// Bound the wall-clock time of a run.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one reconciliation pass.
    pub fn reconcile(&self) -> Result<ReconcileReport, ReconcileError> {
        let _guard = RunGuard::acquire(&self.running).ok_or(ReconcileError::AlreadyRunning)?;

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::reconcile_span().entered();

        let start = Instant::now();
        let result = self.run(start);

        match &result {
            Ok(report) => {
                log::info!(
                    "reconcile {} scanned {} products: {} applied, {} skipped in {:?}",
                    report.run_id,
                    report.products_scanned,
                    report.applied(),
                    report.skipped,
                    report.duration()
                );
                #[cfg(feature = "metrics")]
                METRICS.record_run(report);
            }
            Err(e) => {
                #[cfg(feature = "metrics")]
                METRICS.record_failure(e.label());
                log::debug!("reconcile run failed ({}) after {:?}", e.label(), start.elapsed());
            }
        }
        result
    }

    fn run(&self, start: Instant) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::begin(Utc::now());
        let mut uow = self
            .store
            .begin(Some(self.budget))
            .map_err(|e| self.classify(e))?;

        match self.apply_all(&mut *uow, &mut report, start) {
            Ok(()) => uow.commit().map_err(|e| self.classify(e))?,
            Err(e) => {
                if let Err(rollback) = uow.rollback() {
                    log::warn!("rollback after failed reconcile run: {rollback}");
                }
                return Err(e);
            }
        }

        report.finish(start.elapsed());
        Ok(report)
    }

    fn apply_all<'u>(
        &self,
        uow: &mut (dyn UnitOfWork + 'u),
        report: &mut ReconcileReport,
        start: Instant,
    ) -> Result<(), ReconcileError> {
        let products = uow.products().map_err(|e| self.classify(e))?;
        let inventory = uow.inventory().map_err(|e| self.classify(e))?;
        let archived = uow.archived().map_err(|e| self.classify(e))?;
        report.products_scanned = u32::try_from(products.len()).unwrap_or(u32::MAX);

        for change in plan(&products, &inventory, &archived) {
            if start.elapsed() > self.budget {
                return Err(ReconcileError::BudgetExceeded(self.budget));
            }
            uow.savepoint().map_err(|e| self.classify(e))?;
            match uow.apply(&change) {
                Ok(()) => {
                    uow.release_savepoint().map_err(|e| self.classify(e))?;
                    log::debug!("{change}");
                    report.record(&change);
                }
                Err(e) if e.is_row_level() => {
                    uow.rollback_to_savepoint().map_err(|e| self.classify(e))?;
                    log::warn!("skipped {change}: {e}");
                    report.skipped += 1;
                }
                Err(e) => return Err(self.classify(e)),
            }
        }
        Ok(())
    }

    fn classify(&self, error: StoreError) -> ReconcileError {
        if error.is_unavailable() {
            ReconcileError::StoreUnavailable(error)
        } else if error.is_timeout() {
            ReconcileError::BudgetExceeded(self.budget)
        } else {
            ReconcileError::Store(error)
        }
    }
}
