use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap();

    // Database Metrics (MongoDB)
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of database operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Database operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Cache Metrics (Redis)
    pub static ref CACHE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_operations_total",
        "Total number of cache operations",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref CACHE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "cache_operation_duration_seconds",
        "Cache operation duration in seconds",
        &["operation"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1]
    )
    .unwrap();

    // Generation Metrics
    pub static ref GENERATION_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_generation_attempts_total",
        "Model attempts by outcome",
        &["model", "outcome"]
    )
    .unwrap();

    pub static ref GENERATION_ATTEMPT_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "quiz_generation_attempt_duration_seconds",
        "Duration of a single model call in seconds",
        &["model"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0]
    )
    .unwrap();

    pub static ref GENERATION_BACKOFF_SECONDS: HistogramVec = register_histogram_vec!(
        "quiz_generation_backoff_seconds",
        "Time spent sleeping between attempts",
        &["reason"],
        vec![0.5, 1.0, 2.0, 2.5, 3.0, 5.0, 10.0]
    )
    .unwrap();

    pub static ref QUIZZES_GENERATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quizzes_generated_total",
        "Quizzes returned to callers by content source",
        &["source"]
    )
    .unwrap();

    pub static ref GENERATION_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_generation_failures_total",
        "Generation requests that ended in an error",
        &["reason"]
    )
    .unwrap();

    pub static ref GENERATION_THROTTLED_TOTAL: IntCounter = register_int_counter!(
        "quiz_generation_throttled_total",
        "Generation requests rejected by the per-owner throttle"
    )
    .unwrap();

    // Persistence Metrics
    pub static ref PERSISTENCE_ROLLBACKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_persistence_rollbacks_total",
        "Compensating deletes after a failed question write",
        &["result"]
    )
    .unwrap();

    pub static ref ORPHAN_SWEEPER_TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "orphan_sweeper_ticks_total",
        "Total number of orphan sweeper ticks",
        &["status"]
    )
    .unwrap();

    pub static ref ORPHANS_DELETED_TOTAL: IntCounter = register_int_counter!(
        "orphan_quizzes_deleted_total",
        "Quizzes without questions removed by the sweeper"
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track database operation with metrics
pub async fn track_db_operation<F, T, E>(
    operation: &str,
    collection: &str,
    future: F,
) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

/// Helper: track cache operation with metrics
pub async fn track_cache_operation<F, T, E>(operation: &str, future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    CACHE_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    CACHE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration);

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let _ = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/health", "200"])
            .get();
        let _ = GENERATION_ATTEMPTS_TOTAL
            .with_label_values(&["gemini-2.5-flash", "success"])
            .get();
    }

    #[test]
    fn test_render_metrics() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();
        QUIZZES_GENERATED_TOTAL.with_label_values(&["offline"]).inc();

        let output = render_metrics().unwrap();
        assert!(output.contains("http_requests_total"));
        assert!(output.contains("quizzes_generated_total"));
    }

    #[tokio::test]
    async fn test_track_db_operation_counts_errors() {
        let before = DB_OPERATIONS_TOTAL
            .with_label_values(&["insert", "metrics_test", "error"])
            .get();
        let result: Result<(), String> =
            track_db_operation("insert", "metrics_test", async { Err("boom".to_string()) }).await;
        assert!(result.is_err());
        let after = DB_OPERATIONS_TOTAL
            .with_label_values(&["insert", "metrics_test", "error"])
            .get();
        assert_eq!(after, before + 1);
    }
}
