//! Reconciler metrics and tracing spans.
//!
//! Counters and histograms are recorded through opentelemetry and exported
//! into a prometheus registry owned by [`METRICS`]; [`GrocerMetrics::render`]
//! returns the text exposition (`grocer-sync once --metrics` prints it).

#[cfg(feature = "metrics")]
pub use exporter::{GrocerMetrics, METRICS};

#[cfg(feature = "metrics")]
mod exporter {
    use once_cell::sync::Lazy;
    use opentelemetry::{
        global,
        metrics::{Counter, Histogram, MeterProvider as _},
        KeyValue,
    };
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Encoder, Registry, TextEncoder};

    use crate::reconcile::ReconcileReport;

    pub static METRICS: Lazy<GrocerMetrics> = Lazy::new(GrocerMetrics::init);

    pub struct GrocerMetrics {
        registry: Registry,
        _provider: Option<SdkMeterProvider>,
        pub runs_total: Counter<u64>,
        pub run_failures_total: Counter<u64>,
        pub changes_total: Counter<u64>,
        pub skipped_total: Counter<u64>,
        pub products_scanned: Histogram<u64>,
        pub run_duration: Histogram<f64>,
    }

    impl GrocerMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let provider = match opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
            {
                Ok(exporter) => Some(SdkMeterProvider::builder().with_reader(exporter).build()),
                Err(e) => {
                    log::warn!("prometheus exporter unavailable, metrics are not exported: {e}");
                    None
                }
            };
            let meter = match &provider {
                Some(provider) => provider.meter("grocer"),
                None => global::meter("grocer"),
            };

            let runs_total = meter
                .u64_counter("grocer_reconcile_runs_total")
                .with_description("Completed reconciliation runs")
                .build();

            let run_failures_total = meter
                .u64_counter("grocer_reconcile_failures_total")
                .with_description("Reconciliation runs that were rolled back or refused")
                .build();

            let changes_total = meter
                .u64_counter("grocer_reconcile_changes_total")
                .with_description("Derived-table writes applied, by kind")
                .build();

            let skipped_total = meter
                .u64_counter("grocer_reconcile_skipped_total")
                .with_description("Changes skipped after a row-level failure")
                .build();

            let products_scanned = meter
                .u64_histogram("grocer_reconcile_products_scanned")
                .with_description("Products scanned per run")
                .build();

            let run_duration = meter
                .f64_histogram("grocer_reconcile_duration_seconds")
                .with_description("Duration of reconciliation runs")
                .build();

            Self {
                registry,
                _provider: provider,
                runs_total,
                run_failures_total,
                changes_total,
                skipped_total,
                products_scanned,
                run_duration,
            }
        }

        pub fn record_run(&self, report: &ReconcileReport) {
            self.runs_total.add(1, &[]);
            for (kind, count) in [
                ("insert_inventory", report.inventory_inserted),
                ("update_inventory", report.inventory_updated),
                ("delete_inventory", report.inventory_deleted),
                ("upsert_archived", report.archived_upserted),
                ("delete_archived", report.archived_deleted),
                ("mark_product", report.products_marked),
            ] {
                if count > 0 {
                    self.changes_total
                        .add(u64::from(count), &[KeyValue::new("kind", kind)]);
                }
            }
            self.skipped_total.add(u64::from(report.skipped), &[]);
            self.products_scanned
                .record(u64::from(report.products_scanned), &[]);
            self.run_duration
                .record(report.duration().as_secs_f64(), &[]);
        }

        pub fn record_failure(&self, reason: &'static str) {
            self.run_failures_total
                .add(1, &[KeyValue::new("reason", reason)]);
        }

        /// Prometheus text exposition of everything recorded so far.
        pub fn render(&self) -> String {
            let mut buffer = Vec::new();
            if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
                log::warn!("failed to encode metrics: {e}");
            }
            String::from_utf8(buffer).unwrap_or_default()
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    pub fn connect_span() -> Span {
        info_span!("grocer.connect")
    }

    pub fn execute_query_span(query: &str) -> Span {
        info_span!("grocer.query", db.statement = %query)
    }

    pub fn begin_transaction_span() -> Span {
        info_span!("grocer.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        info_span!("grocer.transaction.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        info_span!("grocer.transaction.rollback")
    }

    pub fn reconcile_span() -> Span {
        info_span!("grocer.reconcile")
    }

    pub fn tick_span(tick: u64) -> Span {
        info_span!("grocer.tick", tick)
    }
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::METRICS;

    #[test]
    fn test_render_exposes_recorded_failures() {
        METRICS.record_failure("store_unavailable");
        let text = METRICS.render();
        assert!(text.contains("grocer_reconcile_failures"));
    }
}
