use std::sync::Arc;

use crate::config::{Config, StoreBackend};
use crate::middlewares::rate_limit::{InMemoryRateLimiter, RateLimiter, RedisRateLimiter};
use crate::services::model_client::{HttpTextModel, TextModel};
use crate::services::question_generator::QuestionGenerator;
use crate::services::quiz_service::QuizService;
use crate::services::session_store::{build_session_store, connect_redis, SessionStore};

pub struct AppState {
    pub config: Config,
    pub quiz: QuizService,
    pub store: Arc<dyn SessionStore>,
    pub model: Arc<dyn TextModel>,
    pub rate_limiter: Arc<dyn RateLimiter>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let redis = match (config.session_store.backend, &config.session_store.redis_uri) {
            (StoreBackend::Redis, Some(uri)) => Some(connect_redis(uri).await?),
            _ => None,
        };

        let store = build_session_store(&config, redis.clone())?;
        let model: Arc<dyn TextModel> = Arc::new(HttpTextModel::new(config.model.clone())?);
        let rate_limiter: Arc<dyn RateLimiter> = match redis {
            Some(redis) => Arc::new(RedisRateLimiter::new(
                redis,
                config.server.rate_limit_max_requests,
                config.rate_limit_window(),
                config.store_timeout(),
            )),
            None => memory_rate_limiter(&config),
        };

        tracing::info!(
            "Using model {} via {} with {} session store and {} rate limiter",
            model.name(),
            config.model.api_url,
            store.backend_name(),
            rate_limiter.backend_name()
        );

        Ok(Self::assemble(config, store, model, rate_limiter))
    }

    /// Wires the service graph around an explicit store and model, limiting in memory.
    pub fn with_components(
        config: Config,
        store: Arc<dyn SessionStore>,
        model: Arc<dyn TextModel>,
    ) -> Self {
        let rate_limiter = memory_rate_limiter(&config);
        Self::assemble(config, store, model, rate_limiter)
    }

    fn assemble(
        config: Config,
        store: Arc<dyn SessionStore>,
        model: Arc<dyn TextModel>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        let generator = QuestionGenerator::new(model.clone(), config.quiz.subject.clone());
        let quiz = QuizService::new(store.clone(), generator, config.quiz.clone());
        Self {
            config,
            quiz,
            store,
            model,
            rate_limiter,
        }
    }
}

fn memory_rate_limiter(config: &Config) -> Arc<dyn RateLimiter> {
    Arc::new(InMemoryRateLimiter::new(
        config.server.rate_limit_max_requests,
        config.rate_limit_window(),
    ))
}

pub mod difficulty;
pub mod model_client;
pub mod question_generator;
pub mod quiz_service;
pub mod results;
pub mod session_store;
