use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, Encoder, Histogram,
    HistogramVec, IntCounterVec, TextEncoder,
};

use crate::error::StoreError;

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
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();

    // Quiz lifecycle
    pub static ref QUIZ_SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_sessions_total",
        "Quiz session lifecycle events",
        &["event"]
    )
    .unwrap();

    pub static ref QUIZ_ANSWERS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_answers_submitted_total",
        "Total number of answers submitted",
        &["correct"]
    )
    .unwrap();

    // Question generation
    pub static ref QUESTION_GENERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "question_generations_total",
        "Question generation attempts by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref QUESTION_GENERATION_DURATION_SECONDS: Histogram = register_histogram!(
        "question_generation_duration_seconds",
        "Time spent generating one question, model call included",
        vec![0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 15.0, 30.0, 60.0]
    )
    .unwrap();

    // Session store
    pub static ref SESSION_STORE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "session_store_operations_total",
        "Session store operations",
        &["backend", "operation", "status"]
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

/// Helper: track session store operation with metrics
pub async fn track_store_operation<F, T>(
    backend: &str,
    operation: &str,
    future: F,
) -> Result<T, StoreError>
where
    F: std::future::Future<Output = Result<T, StoreError>>,
{
    let result = future.await;

    let status = match &result {
        Ok(_) => "success",
        Err(StoreError::Conflict { .. }) => "conflict",
        Err(StoreError::Timeout { .. }) => "timeout",
        Err(_) => "error",
    };

    SESSION_STORE_OPERATIONS_TOTAL
        .with_label_values(&[backend, operation, status])
        .inc();

    result
}

pub fn record_session_event(event: &str) {
    QUIZ_SESSIONS_TOTAL.with_label_values(&[event]).inc();
}

pub fn record_answer(correct: bool) {
    QUIZ_ANSWERS_SUBMITTED_TOTAL
        .with_label_values(&[if correct { "true" } else { "false" }])
        .inc();
}
