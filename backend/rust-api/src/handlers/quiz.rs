use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use crate::error::QuizError;
use crate::extractors::AppJson;
use crate::handlers::{reject, ApiError};
use crate::middlewares::request_id::RequestContext;
use crate::models::envelope::ApiResponse;
use crate::models::quiz::{StartQuizRequest, SubmitAnswerRequest};
use crate::models::Difficulty;
use crate::services::AppState;

/// POST /api/v1/quiz/start
///
/// The body is optional; without one the quiz starts at beginner level for an anonymous user.
pub async fn start_quiz(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    body: Option<AppJson<StartQuizRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body.map(|AppJson(req)| req).unwrap_or_default();
    let difficulty = req
        .difficulty
        .as_deref()
        .map(str::parse::<Difficulty>)
        .transpose()
        .map_err(|message| reject(&state, &ctx, None, QuizError::Validation(message)))?;

    tracing::info!(
        "request_id={} starting quiz (difficulty: {}, user: {})",
        ctx.request_id,
        difficulty.unwrap_or_default(),
        req.user_id.as_deref().unwrap_or("anonymous")
    );

    let started = state
        .quiz
        .start(difficulty, req.user_id)
        .await
        .map_err(|e| reject(&state, &ctx, None, e))?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(started))))
}

/// GET /api/v1/quiz/session/{id}
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state
        .quiz
        .get_session_status(&session_id)
        .await
        .map_err(|e| reject(&state, &ctx, Some(&session_id), e))?;

    Ok(Json(ApiResponse::ok(status)))
}

/// DELETE /api/v1/quiz/session/{id}
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .quiz
        .delete_session(&session_id)
        .await
        .map_err(|e| reject(&state, &ctx, Some(&session_id), e))?;

    Ok(Json(ApiResponse::ok(serde_json::json!({
        "sessionId": session_id,
        "deleted": true
    }))))
}

/// GET /api/v1/quiz/question/{id}
pub async fn get_question(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let next = state
        .quiz
        .get_next_question(&session_id)
        .await
        .map_err(|e| reject(&state, &ctx, Some(&session_id), e))?;

    Ok(Json(ApiResponse::ok(next)))
}

/// POST /api/v1/quiz/answer
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    AppJson(req): AppJson<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = req.session_id.clone();
    let outcome = state
        .quiz
        .submit_answer(req)
        .await
        .map_err(|e| reject(&state, &ctx, Some(&session_id), e))?;

    Ok(Json(ApiResponse::ok(outcome)))
}

/// GET /api/v1/quiz/results/{id}
pub async fn get_results(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let results = state
        .quiz
        .get_results(&session_id)
        .await
        .map_err(|e| reject(&state, &ctx, Some(&session_id), e))?;

    Ok(Json(ApiResponse::ok(results)))
}

/// GET /api/v1/quiz/progress/{id}
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let progress = state
        .quiz
        .get_progress(&session_id)
        .await
        .map_err(|e| reject(&state, &ctx, Some(&session_id), e))?;

    Ok(Json(ApiResponse::ok(progress)))
}
