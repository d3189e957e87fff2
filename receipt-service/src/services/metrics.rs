//! Metrics module for receipt-service.
//! Prometheus counters for reconciliation and receipt flows, rendered together
//! with the HTTP request metrics recorded by the shared middleware.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "receipt_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Recorder handle for `metrics` macros used by the HTTP middleware
pub static METRICS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Reconciliation runs by outcome
pub static RECONCILIATION_RUNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Synthetic FAILED receipts written by the reconciler
pub static FAILED_RECEIPTS_CREATED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Receipt operations (submit, review, list)
pub static RECEIPT_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Safe to call more than once.
pub fn init_metrics() {
    METRICS_HANDLE.get_or_init(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("Prometheus recorder not installed: {}", e);
            None
        }
    });

    RECONCILIATION_RUNS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "receipt_reconciliation_runs_total",
                "Total reconciliation runs by outcome"
            ),
            &["outcome"]
        )
        .expect("Failed to register RECONCILIATION_RUNS_TOTAL")
    });

    FAILED_RECEIPTS_CREATED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "receipt_failed_receipts_created_total",
                "Total synthetic FAILED receipts created by cutoff type"
            ),
            &["cutoff"]
        )
        .expect("Failed to register FAILED_RECEIPTS_CREATED_TOTAL")
    });

    RECEIPT_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "receipt_operations_total",
                "Total receipt operations by operation type"
            ),
            &["operation"]
        )
        .expect("Failed to register RECEIPT_OPERATIONS_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("receipt_errors_total", "Total errors by type for alerting"),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    let mut output = String::from_utf8_lossy(&buffer).into_owned();

    if let Some(Some(handle)) = METRICS_HANDLE.get() {
        output.push_str(&handle.render());
    }
    output
}

/// Record a reconciliation run outcome (`ok`, `unknown_cutoff`, `error`).
pub fn record_reconciliation(outcome: &str) {
    if let Some(counter) = RECONCILIATION_RUNS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Record synthetic FAILED receipts written for a cutoff type.
pub fn record_failed_receipts(cutoff: &str, count: u64) {
    if let Some(counter) = FAILED_RECEIPTS_CREATED_TOTAL.get() {
        counter.with_label_values(&[cutoff]).inc_by(count);
    }
}

/// Record a receipt operation.
pub fn record_receipt_operation(operation: &str) {
    if let Some(counter) = RECEIPT_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}

/// Record an error.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}
