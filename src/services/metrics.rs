//! Prometheus metrics for bank-sync-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for sync runs by outcome.
pub static SYNC_RUNS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bank_sync_runs_total",
        "Total number of sync runs",
        &["status"]
    )
    .expect("Failed to register SYNC_RUNS")
});

/// Counter for per-account sync outcomes.
pub static ACCOUNT_SYNCS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bank_sync_account_syncs_total",
        "Total number of per-account sync attempts",
        &["status"]
    )
    .expect("Failed to register ACCOUNT_SYNCS")
});

/// Counter for ingested transactions.
pub static TRANSACTIONS_INGESTED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bank_sync_transactions_ingested_total",
        "Total number of transactions ingested",
        &["status"]
    )
    .expect("Failed to register TRANSACTIONS_INGESTED")
});

/// Counter for match candidates produced by the matching engine.
pub static MATCH_CANDIDATES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bank_sync_match_candidates_total",
        "Total number of match candidates produced",
        &["outcome"]
    )
    .expect("Failed to register MATCH_CANDIDATES")
});

/// Counter for payment applications.
pub static PAYMENT_APPLICATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bank_sync_payment_applications_total",
        "Total number of payment application attempts",
        &["status"]
    )
    .expect("Failed to register PAYMENT_APPLICATIONS")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bank_sync_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "bank_sync_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Histogram for provider fetch duration.
pub static PROVIDER_FETCH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "bank_sync_provider_fetch_duration_seconds",
        "Provider transaction fetch duration in seconds",
        &["status"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register PROVIDER_FETCH_DURATION")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&SYNC_RUNS);
    Lazy::force(&ACCOUNT_SYNCS);
    Lazy::force(&TRANSACTIONS_INGESTED);
    Lazy::force(&MATCH_CANDIDATES);
    Lazy::force(&PAYMENT_APPLICATIONS);
    Lazy::force(&ERRORS);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&PROVIDER_FETCH_DURATION);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}

/// Record a per-account sync outcome.
pub fn record_account_sync(status: &str) {
    ACCOUNT_SYNCS.with_label_values(&[status]).inc();
}

/// Record an ingested transaction.
pub fn record_transaction_ingested(status: &str) {
    TRANSACTIONS_INGESTED.with_label_values(&[status]).inc();
}

/// Record a payment application attempt.
pub fn record_payment_application(status: &str) {
    PAYMENT_APPLICATIONS.with_label_values(&[status]).inc();
}
