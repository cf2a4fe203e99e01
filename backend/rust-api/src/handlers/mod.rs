use axum::{
    extract::{OriginalUri, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::json;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::QuizError;
use crate::metrics;
use crate::middlewares::metrics::UnmatchedRoute;
use crate::middlewares::request_id::RequestContext;
use crate::models::envelope::ApiErrorResponse;
use crate::services::AppState;

pub mod quiz;

const MODEL_CHECK_TIMEOUT: Duration = Duration::from_secs(2);
const STORE_CHECK_TIMEOUT: Duration = Duration::from_secs(1);

/// Error envelope returned by every handler: `{success: false, error: {code, message}, timestamp}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_JSON", message)
    }

    pub fn with_details(mut self, details: Option<String>) -> Self {
        self.details = details;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse::new(self.code, self.message, self.details);
        (self.status, Json(body)).into_response()
    }
}

/// Logs a service error once, with correlation ids, and converts it into the public envelope.
/// Internal detail is attached outside production only.
pub(crate) fn reject(
    state: &AppState,
    ctx: &RequestContext,
    session_id: Option<&str>,
    err: QuizError,
) -> ApiError {
    let status = err.status();
    let session = session_id.unwrap_or("-");
    if status.is_server_error() {
        tracing::error!(
            "request_id={} session_id={} {} ({}): {}",
            ctx.request_id,
            session,
            err.code(),
            status.as_u16(),
            error_chain(&err)
        );
    } else {
        tracing::warn!(
            "request_id={} session_id={} {} ({}): {}",
            ctx.request_id,
            session,
            err.code(),
            status.as_u16(),
            err
        );
    }

    let details = (!state.config.is_production()).then(|| error_chain(&err));
    ApiError::new(status, err.code(), err.public_message()).with_details(details)
}

fn error_chain(err: &dyn StdError) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !chain.contains(&text) {
            chain.push_str(": ");
            chain.push_str(&text);
        }
        source = cause.source();
    }
    chain
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut status = "healthy";
    let mut services = serde_json::Map::new();
    let mut all_healthy = true;

    // Check text-generation model
    let model_health = check_model(&state).await;
    if model_health.get("status").and_then(|v| v.as_str()) != Some("healthy") {
        all_healthy = false;
        status = "degraded";
    }
    services.insert("model".to_string(), json!(model_health));

    // Check session store
    let store_health = check_store(&state).await;
    if store_health.get("status").and_then(|v| v.as_str()) != Some("healthy") {
        all_healthy = false;
        status = "degraded";
    }
    services.insert("store".to_string(), json!(store_health));

    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "service": "adaptive-quiz-api",
            "version": env!("CARGO_PKG_VERSION"),
            "environment": state.config.app_env,
            "services": services,
            "timestamp": chrono::Utc::now(),
        })),
    )
}

async fn check_model(state: &AppState) -> serde_json::Map<String, serde_json::Value> {
    let mut result = serde_json::Map::new();
    let started = Instant::now();

    match tokio::time::timeout(MODEL_CHECK_TIMEOUT, state.model.probe()).await {
        Ok(Ok(())) => {
            result.insert("status".to_string(), json!("healthy"));
            result.insert("model".to_string(), json!(state.model.name()));
        }
        Ok(Err(e)) => {
            report_unhealthy(state, &mut result, format!("Model error: {}", e));
        }
        Err(_) => {
            report_unhealthy(
                state,
                &mut result,
                format!("Model check timeout after {:?}", MODEL_CHECK_TIMEOUT),
            );
        }
    }
    result.insert(
        "latencyMs".to_string(),
        json!(started.elapsed().as_millis() as u64),
    );

    result
}

async fn check_store(state: &AppState) -> serde_json::Map<String, serde_json::Value> {
    let mut result = serde_json::Map::new();
    let started = Instant::now();

    match tokio::time::timeout(STORE_CHECK_TIMEOUT, state.store.ping()).await {
        Ok(Ok(())) => {
            result.insert("status".to_string(), json!("healthy"));
            result.insert("backend".to_string(), json!(state.store.backend_name()));
        }
        Ok(Err(e)) => {
            report_unhealthy(state, &mut result, format!("Store error: {}", e));
        }
        Err(_) => {
            report_unhealthy(
                state,
                &mut result,
                format!("Store check timeout after {:?}", STORE_CHECK_TIMEOUT),
            );
        }
    }
    result.insert(
        "latencyMs".to_string(),
        json!(started.elapsed().as_millis() as u64),
    );

    result
}

/// Failure text is logged always and returned to callers outside production only.
fn report_unhealthy(
    state: &AppState,
    result: &mut serde_json::Map<String, serde_json::Value>,
    error: String,
) {
    tracing::warn!("Health check failed: {}", error);
    result.insert("status".to_string(), json!("unhealthy"));
    if !state.config.is_production() {
        result.insert("error".to_string(), json!(error));
    }
}

/// Unknown paths and unsupported methods answer in the error envelope.
pub async fn endpoint_not_found(
    method: Method,
    OriginalUri(uri): OriginalUri,
) -> impl IntoResponse {
    (
        Extension(UnmatchedRoute),
        ApiError::new(
            StatusCode::NOT_FOUND,
            "ENDPOINT_NOT_FOUND",
            format!("Endpoint {} {} not found", method, uri),
        ),
    )
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}
