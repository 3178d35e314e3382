/// Metrics and telemetry for the pinning service
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Pin lifecycle outcomes and completion queue depth
/// - Storage ledger adjustments and audit drift
/// - Storage network failures
/// - Background job execution

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder,
    Gauge, HistogramVec, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, route, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // ========== Pin Metrics ==========

    /// Pins accepted by owner type
    pub static ref PINS_CREATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "pins_created_total",
        "Total number of pins accepted for processing",
        &["owner_type"]
    )
    .unwrap();

    /// Completion step outcomes
    pub static ref PIN_COMPLETIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "pin_completions_total",
        "Completion step outcomes",
        &["outcome"]
    )
    .unwrap();

    /// Jobs waiting in the completion queue
    pub static ref COMPLETION_QUEUE_DEPTH: IntGauge = register_int_gauge!(
        "pin_completion_queue_depth",
        "Number of completion jobs waiting for a worker"
    )
    .unwrap();

    // ========== Ledger Metrics ==========

    /// Ledger adjustments by direction and result
    pub static ref LEDGER_ADJUSTMENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "storage_ledger_adjustments_total",
        "Storage ledger adjustments",
        &["direction", "result"]
    )
    .unwrap();

    /// Owners whose ledger disagreed with their pinned bytes at the last audit
    pub static ref LEDGER_DRIFT_OWNERS: IntGauge = register_int_gauge!(
        "storage_ledger_drift_owners",
        "Owners with ledger drift at the last audit"
    )
    .unwrap();

    // ========== Storage Network Metrics ==========

    /// Failed storage network calls by operation
    pub static ref NETWORK_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "storage_network_failures_total",
        "Failed storage network calls",
        &["operation"]
    )
    .unwrap();

    // ========== Background Job Metrics ==========

    /// Background job executions by type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .unwrap();

    /// Background job duration in seconds
    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "background_job_duration_seconds",
        "Background job execution time in seconds",
        &["job_type"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap();

    // ========== System Metrics ==========

    /// Application uptime in seconds
    pub static ref UPTIME_SECONDS: Gauge = register_gauge!(
        "uptime_seconds",
        "Application uptime in seconds"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

pub fn record_pin_created(owner_type: &str) {
    PINS_CREATED_TOTAL.with_label_values(&[owner_type]).inc();
}

/// Record a completion outcome (`pinned`, `failed`, `skipped`, `error`)
pub fn record_pin_completion(outcome: &str) {
    PIN_COMPLETIONS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a ledger adjustment
pub fn record_ledger_adjustment(delta_bytes: i64, success: bool) {
    let direction = if delta_bytes >= 0 { "increment" } else { "decrement" };
    LEDGER_ADJUSTMENTS_TOTAL
        .with_label_values(&[direction, if success { "success" } else { "failure" }])
        .inc();
}

pub fn record_network_failure(operation: &str) {
    NETWORK_FAILURES_TOTAL.with_label_values(&[operation]).inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str, duration: f64) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_type])
        .observe(duration);
}
