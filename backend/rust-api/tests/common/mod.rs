#![allow(dead_code)]

use adaptive_quiz_api::{
    config::Config,
    create_router,
    error::GenerationError,
    services::{
        model_client::TextModel,
        session_store::{InMemorySessionStore, SessionStore},
        AppState,
    },
};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const DOMAINS: [&str; 4] = [
    "Machine Learning Fundamentals",
    "AI Services",
    "Responsible AI",
    "Generative AI",
];

/// Stand-in for the hosted model. Replies with a well-formed question wrapped in prose
/// until `healthy_calls` replies have been served, then with text containing no JSON.
pub struct ScriptedModel {
    calls: AtomicUsize,
    healthy_calls: Option<usize>,
    reachable: bool,
}

impl ScriptedModel {
    pub fn healthy() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            healthy_calls: None,
            reachable: true,
        }
    }

    /// Fails readiness checks with a transport error naming the upstream host.
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::healthy()
        }
    }

    pub fn without_json() -> Self {
        Self::failing_after(0)
    }

    pub fn failing_after(healthy_calls: usize) -> Self {
        Self {
            healthy_calls: Some(healthy_calls),
            ..Self::healthy()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.healthy_calls.is_some_and(|limit| n >= limit) {
            return Ok("I'm sorry, I can't produce a question right now.".to_string());
        }

        let topic = prompt
            .lines()
            .find_map(|line| line.strip_prefix("Focus specifically on: "))
            .unwrap_or("Amazon SageMaker");
        let question = json!({
            "question": format!("Question #{} about {}?", n + 1, topic),
            "options": ["The right answer", "Wrong one", "Also wrong", "Not this"],
            "correctAnswer": 0,
            "explanation": "Because it is right.",
            "topic": topic,
            "domain": DOMAINS[n % DOMAINS.len()],
        });
        Ok(format!("Here is your question:\n{}\nGood luck!", question))
    }

    async fn probe(&self) -> Result<(), GenerationError> {
        if self.reachable {
            Ok(())
        } else {
            Err(GenerationError::Transport(
                "error sending request for url (https://models.internal:8443/v1/messages)"
                    .to_string(),
            ))
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn test_config() -> Config {
    Config {
        app_env: "test".to_string(),
        ..Config::default()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn create_test_state(model: Arc<dyn TextModel>) -> Arc<AppState> {
    create_test_state_from(test_config(), model)
}

pub fn create_test_state_from(config: Config, model: Arc<dyn TextModel>) -> Arc<AppState> {
    init_tracing();
    let store: Arc<dyn SessionStore> =
        Arc::new(InMemorySessionStore::new(Duration::from_secs(3600)));
    Arc::new(AppState::with_components(config, store, model))
}

pub fn create_test_app() -> Router {
    create_test_app_with(Arc::new(ScriptedModel::healthy()))
}

pub fn create_test_app_with(model: Arc<dyn TextModel>) -> Router {
    create_router(create_test_state(model))
}

pub fn create_test_app_from(config: Config, model: Arc<dyn TextModel>) -> Router {
    create_router(create_test_state_from(config, model))
}

pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, "GET", uri, None).await
}

pub async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, "POST", uri, Some(body)).await
}

/// Starts a quiz and returns `(session_id, first_question)`.
pub async fn start_quiz(app: &Router, difficulty: &str) -> (String, Value) {
    let (status, body) = post(app, "/api/v1/quiz/start", json!({ "difficulty": difficulty })).await;
    assert_eq!(status, StatusCode::CREATED, "start failed: {}", body);
    let session_id = body["data"]["sessionId"].as_str().unwrap().to_string();
    (session_id, body["data"]["firstQuestion"].clone())
}

pub async fn answer(
    app: &Router,
    session_id: &str,
    question: &Value,
    correct: bool,
) -> (StatusCode, Value) {
    let right = question["correctAnswer"].as_u64().unwrap();
    let selected = if correct { right } else { (right + 1) % 4 };
    post(
        app,
        "/api/v1/quiz/answer",
        json!({
            "sessionId": session_id,
            "questionId": question["id"],
            "selectedAnswer": selected,
            "timeSpent": 12.5,
        }),
    )
    .await
}
