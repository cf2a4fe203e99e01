//! Error taxonomy shared by the generator, the session store and the quiz service.
//!
//! Each variant maps to one HTTP status and one stable error code at the API boundary;
//! see `handlers::ApiError`.

use axum::http::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Failures while producing a question from the text-generation model.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("model request failed: {0}")]
    Transport(String),

    #[error("model request timed out after {0:?}")]
    Timeout(Duration),

    #[error("model returned HTTP {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("model response contained no text")]
    EmptyResponse,

    #[error("no JSON object found in model response")]
    NoJsonFound,

    #[error("model response is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("generated question failed validation: {0}")]
    SchemaViolation(String),
}

impl GenerationError {
    /// Short machine-readable subtype, used for metrics labels and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Transport(_) => "transport",
            GenerationError::Timeout(_) => "timeout",
            GenerationError::UpstreamStatus { .. } => "upstream_status",
            GenerationError::EmptyResponse => "empty_response",
            GenerationError::NoJsonFound => "no_json_found",
            GenerationError::MalformedJson(_) => "malformed_json",
            GenerationError::SchemaViolation(_) => "schema_violation",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store backend error: {0}")]
    Backend(String),

    #[error("session store operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Another writer updated the session first.
    #[error("concurrent update detected for session {session_id}")]
    Conflict { session_id: String },

    #[error("session {session_id} already exists")]
    AlreadyExists { session_id: String },

    /// The session expired or was deleted between read and write.
    #[error("session {session_id} no longer exists")]
    Missing { session_id: String },

    #[error("failed to (de)serialize session: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum QuizError {
    #[error("{0}")]
    Validation(String),

    #[error("Quiz session not found: {0}")]
    SessionNotFound(String),

    #[error("Question {received} is not the current question of session {session_id}")]
    QuestionMismatch {
        session_id: String,
        received: String,
    },

    #[error("Quiz session {0} is already completed")]
    QuizAlreadyCompleted(String),

    #[error("Quiz session {0} has no answered questions yet")]
    QuizNotStarted(String),

    #[error("Failed to create quiz session: {0}")]
    SessionCreation(#[source] GenerationError),

    #[error("Question generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Session store failure: {0}")]
    Store(#[from] StoreError),
}

impl QuizError {
    pub fn status(&self) -> StatusCode {
        match self {
            QuizError::Validation(_) | QuizError::QuizNotStarted(_) => StatusCode::BAD_REQUEST,
            QuizError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            QuizError::QuestionMismatch { .. } | QuizError::QuizAlreadyCompleted(_) => {
                StatusCode::CONFLICT
            }
            QuizError::SessionCreation(_) | QuizError::Generation(_) => StatusCode::BAD_GATEWAY,
            QuizError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            QuizError::Validation(_) => "VALIDATION_ERROR",
            QuizError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            QuizError::QuestionMismatch { .. } => "QUESTION_MISMATCH",
            QuizError::QuizAlreadyCompleted(_) => "QUIZ_ALREADY_COMPLETED",
            QuizError::QuizNotStarted(_) => "QUIZ_NOT_STARTED",
            QuizError::SessionCreation(_) => "SESSION_CREATION_FAILED",
            QuizError::Generation(_) => "GENERATION_FAILED",
            QuizError::Store(_) => "STORE_FAILURE",
        }
    }

    /// Message safe to show to end users. Upstream and store internals are never included.
    pub fn public_message(&self) -> String {
        match self {
            QuizError::Validation(message) => message.clone(),
            QuizError::SessionNotFound(_) => "Quiz session not found".to_string(),
            QuizError::QuestionMismatch { .. } => {
                "The submitted question is no longer the current question for this session"
                    .to_string()
            }
            QuizError::QuizAlreadyCompleted(_) => "Quiz already completed".to_string(),
            QuizError::QuizNotStarted(_) => {
                "No questions have been answered in this session yet".to_string()
            }
            QuizError::SessionCreation(_) => {
                "Could not start a quiz session, please try again".to_string()
            }
            QuizError::Generation(_) => {
                "Could not generate a question right now, please try again".to_string()
            }
            QuizError::Store(_) => "Internal server error".to_string(),
        }
    }
}
