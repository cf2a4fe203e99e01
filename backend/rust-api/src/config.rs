use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::services::difficulty::DifficultyLadder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Empty list means any origin.
    pub cors_allowed_origins: Vec<String>,
    /// Per-client fixed window applied to `/api/v1`.
    pub rate_limit_enabled: bool,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            cors_allowed_origins: Vec::new(),
            rate_limit_enabled: true,
            rate_limit_max_requests: 100,
            rate_limit_window_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuizConfig {
    pub total_questions: u32,
    pub time_limit_minutes: u64,
    pub passing_score: u32,
    /// Last question position served at beginner base difficulty.
    pub beginner_until: u32,
    /// Last question position served at intermediate base difficulty.
    pub intermediate_until: u32,
    pub subject: String,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            total_questions: 10,
            time_limit_minutes: 30,
            passing_score: 70,
            beginner_until: 3,
            intermediate_until: 7,
            subject: "AWS AI Practitioner certification".to_string(),
        }
    }
}

impl QuizConfig {
    pub fn time_limit_seconds(&self) -> u64 {
        self.time_limit_minutes * 60
    }

    pub fn ladder(&self) -> DifficultyLadder {
        DifficultyLadder::new(self.beginner_until, self.intermediate_until)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub api_url: String,
    pub api_key: String,
    pub model_id: String,
    pub api_version: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.anthropic.com/v1/messages".to_string(),
            api_key: String::new(),
            model_id: "claude-3-haiku-20240307".to_string(),
            api_version: "2023-06-01".to_string(),
            max_tokens: 2000,
            temperature: 0.7,
            top_p: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionStoreConfig {
    pub backend: StoreBackend,
    pub redis_uri: Option<String>,
    /// Overrides the backend's default session TTL.
    pub ttl_seconds: Option<u64>,
    pub operation_timeout_ms: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_uri: None,
            ttl_seconds: None,
            operation_timeout_ms: 2000,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app_env: String,
    pub server: ServerConfig,
    pub quiz: QuizConfig,
    pub model: ModelConfig,
    pub session_store: SessionStoreConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_env: "dev".to_string(),
            server: ServerConfig::default(),
            quiz: QuizConfig::default(),
            model: ModelConfig::default(),
            session_store: SessionStoreConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/{env}.toml, then APP__SECTION__KEY overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors_allowed_origins")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: Config = settings.try_deserialize()?;
        cfg.app_env = app_env;

        // Conventional variable names used by hosting platforms
        if cfg.model.api_key.is_empty() {
            cfg.model.api_key = env::var("MODEL_API_KEY")
                .or_else(|_| env::var("ANTHROPIC_API_KEY"))
                .unwrap_or_default();
        }
        if cfg.session_store.redis_uri.is_none() {
            cfg.session_store.redis_uri = env::var("REDIS_URI").ok();
        }
        if let Ok(port) = env::var("PORT") {
            cfg.server.port = port
                .parse()
                .map_err(|_| config::ConfigError::Message(format!("Invalid PORT '{}'", port)))?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let quiz = &self.quiz;
        if quiz.total_questions == 0 {
            return Err(config::ConfigError::Message(
                "quiz.total_questions must be greater than zero".to_string(),
            ));
        }
        // Three non-empty contiguous ranges covering 1..=total_questions
        if !(quiz.beginner_until >= 1
            && quiz.beginner_until < quiz.intermediate_until
            && quiz.intermediate_until < quiz.total_questions)
        {
            return Err(config::ConfigError::Message(format!(
                "difficulty ranges must satisfy 1 <= beginner_until ({}) < intermediate_until ({}) < total_questions ({})",
                quiz.beginner_until, quiz.intermediate_until, quiz.total_questions
            )));
        }
        if quiz.passing_score > 100 {
            return Err(config::ConfigError::Message(
                "quiz.passing_score must be a percentage (0-100)".to_string(),
            ));
        }
        if self.server.rate_limit_enabled
            && (self.server.rate_limit_max_requests == 0 || self.server.rate_limit_window_secs == 0)
        {
            return Err(config::ConfigError::Message(
                "server.rate_limit_max_requests and server.rate_limit_window_secs must be greater than zero"
                    .to_string(),
            ));
        }
        if self.session_store.backend == StoreBackend::Redis
            && self
                .session_store
                .redis_uri
                .as_deref()
                .is_none_or(|uri| uri.trim().is_empty())
        {
            return Err(config::ConfigError::Message(
                "session_store.redis_uri is required when backend = \"redis\"".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "prod"
    }

    /// Session TTL: explicit override, else 24h for Redis and twice the quiz time limit in memory.
    pub fn session_ttl(&self) -> Duration {
        if let Some(secs) = self.session_store.ttl_seconds {
            return Duration::from_secs(secs);
        }
        match self.session_store.backend {
            StoreBackend::Redis => Duration::from_secs(24 * 60 * 60),
            StoreBackend::Memory => Duration::from_secs(self.quiz.time_limit_seconds() * 2),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.session_store.operation_timeout_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.server.rate_limit_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.quiz.time_limit_seconds(), 1800);
        assert_eq!(cfg.session_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn rate_limit_defaults_to_a_hundred_per_quarter_hour() {
        let cfg = Config::default();
        assert!(cfg.server.rate_limit_enabled);
        assert_eq!(cfg.server.rate_limit_max_requests, 100);
        assert_eq!(cfg.rate_limit_window(), Duration::from_secs(900));
    }

    #[test]
    fn enabled_rate_limit_rejects_zero_budget() {
        let mut cfg = Config::default();
        cfg.server.rate_limit_max_requests = 0;
        assert!(cfg.validate().is_err());

        cfg.server.rate_limit_enabled = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn redis_ttl_defaults_to_a_day() {
        let mut cfg = Config::default();
        cfg.session_store.backend = StoreBackend::Redis;
        cfg.session_store.redis_uri = Some("redis://127.0.0.1:6379".to_string());
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.session_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn redis_backend_requires_uri() {
        let mut cfg = Config::default();
        cfg.session_store.backend = StoreBackend::Redis;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn overlapping_ranges_are_rejected() {
        let mut cfg = Config::default();
        cfg.quiz.beginner_until = 7;
        cfg.quiz.intermediate_until = 7;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.quiz.intermediate_until = 10;
        assert!(cfg.validate().is_err());
    }

    #[test]
    #[serial]
    fn env_overrides_are_applied() {
        env::set_var("APP_ENV", "test-env-overrides");
        env::set_var("APP__QUIZ__TOTAL_QUESTIONS", "12");
        env::set_var("APP__QUIZ__INTERMEDIATE_UNTIL", "8");
        env::set_var("MODEL_API_KEY", "test-key");

        let cfg = Config::load().unwrap();

        env::remove_var("APP_ENV");
        env::remove_var("APP__QUIZ__TOTAL_QUESTIONS");
        env::remove_var("APP__QUIZ__INTERMEDIATE_UNTIL");
        env::remove_var("MODEL_API_KEY");

        assert_eq!(cfg.app_env, "test-env-overrides");
        assert_eq!(cfg.quiz.total_questions, 12);
        assert_eq!(cfg.quiz.intermediate_until, 8);
        assert_eq!(cfg.model.api_key, "test-key");
    }
}
