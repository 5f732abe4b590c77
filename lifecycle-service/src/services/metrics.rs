//! Prometheus metrics for lifecycle-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Transition counter by operation and outcome (applied, noop, or the
/// rejection code).
pub static TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lifecycle_transitions_total",
        "Total number of invoice transition attempts",
        &["operation", "outcome"]
    )
    .expect("Failed to register transitions_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "lifecycle_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Notification dispatch counter by outcome.
pub static EMAILS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lifecycle_emails_total",
        "Total number of invoice notification dispatch attempts",
        &["outcome"]
    )
    .expect("Failed to register emails_total")
});

/// Processor webhook counter by event type and outcome.
pub static WEBHOOK_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lifecycle_webhook_events_total",
        "Total number of processor webhook events",
        &["event_type", "outcome"]
    )
    .expect("Failed to register webhook_events_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&TRANSITIONS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&EMAILS_TOTAL);
    Lazy::force(&WEBHOOK_EVENTS_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
