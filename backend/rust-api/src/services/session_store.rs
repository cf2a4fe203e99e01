use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::{Config, StoreBackend};
use crate::error::StoreError;
use crate::metrics::track_store_operation;
use crate::models::QuizSession;

/// Key-value persistence for quiz sessions with a fixed time-to-live.
///
/// Expired sessions disappear silently: `get` returns `None` as if the id never existed.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fails with `AlreadyExists` if the id is taken.
    async fn create(&self, session: &QuizSession) -> Result<(), StoreError>;

    async fn get(&self, session_id: &str) -> Result<Option<QuizSession>, StoreError>;

    /// Compare-and-set: succeeds only when the stored version is `session.version - 1`.
    /// The expiry set at creation is kept.
    async fn update(&self, session: &QuizSession) -> Result<(), StoreError>;

    /// Returns whether a session was removed.
    async fn delete(&self, session_id: &str) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Drops expired entries. Backends with native expiry have nothing to do.
    async fn purge_expired(&self) -> Result<usize, StoreError> {
        Ok(0)
    }

    fn backend_name(&self) -> &'static str;
}

/// Picks the backend named in configuration. The Redis backend needs the shared connection.
pub fn build_session_store(
    config: &Config,
    redis: Option<ConnectionManager>,
) -> anyhow::Result<Arc<dyn SessionStore>> {
    let ttl = config.session_ttl();
    match config.session_store.backend {
        StoreBackend::Memory => {
            tracing::warn!(
                "Using in-memory session store (ttl {:?}); sessions do not survive restarts and are not shared across instances",
                ttl
            );
            Ok(Arc::new(InMemorySessionStore::new(ttl)))
        }
        StoreBackend::Redis => {
            let redis =
                redis.ok_or_else(|| anyhow::anyhow!("Redis backend selected without a connection"))?;
            tracing::info!("Redis session store ready (ttl {:?})", ttl);
            Ok(Arc::new(RedisSessionStore::new(redis, ttl, config.store_timeout())))
        }
    }
}

/// Opens the connection shared by the Redis session store and the rate limiter.
pub async fn connect_redis(uri: &str) -> anyhow::Result<ConnectionManager> {
    let client = redis::Client::open(uri)?;

    tracing::info!("Attempting to connect to Redis...");

    let mut redis = tokio::time::timeout(Duration::from_secs(30), ConnectionManager::new(client))
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    let _: String = redis::cmd("PING")
        .query_async(&mut redis)
        .await
        .map_err(|e| anyhow::anyhow!("Redis PING failed: {}", e))?;

    tracing::info!("Connected to Redis");
    Ok(redis)
}

fn check_version(session: &QuizSession, stored_version: u64) -> Result<(), StoreError> {
    if stored_version + 1 != session.version {
        tracing::warn!(
            "Version conflict on session {}: stored {}, written {}",
            session.session_id,
            stored_version,
            session.version
        );
        return Err(StoreError::Conflict {
            session_id: session.session_id.clone(),
        });
    }
    Ok(())
}

struct Entry {
    session: QuizSession,
    expires_at: Instant,
}

/// Single-process store. Expired entries are dropped lazily on read and by `purge_expired`.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: &QuizSession) -> Result<(), StoreError> {
        track_store_operation(self.backend_name(), "create", async {
            let mut sessions = self.sessions.write().await;
            let now = Instant::now();
            if let Some(existing) = sessions.get(&session.session_id) {
                if existing.expires_at > now {
                    return Err(StoreError::AlreadyExists {
                        session_id: session.session_id.clone(),
                    });
                }
            }
            sessions.insert(
                session.session_id.clone(),
                Entry {
                    session: session.clone(),
                    expires_at: now + self.ttl,
                },
            );
            Ok(())
        })
        .await
    }

    async fn get(&self, session_id: &str) -> Result<Option<QuizSession>, StoreError> {
        track_store_operation(self.backend_name(), "get", async {
            {
                let sessions = self.sessions.read().await;
                match sessions.get(session_id) {
                    None => return Ok(None),
                    Some(entry) if entry.expires_at > Instant::now() => {
                        return Ok(Some(entry.session.clone()))
                    }
                    Some(_) => {}
                }
            }
            // Expired: drop it
            let mut sessions = self.sessions.write().await;
            if sessions
                .get(session_id)
                .is_some_and(|entry| entry.expires_at <= Instant::now())
            {
                sessions.remove(session_id);
                tracing::debug!("Session {} expired and was removed", session_id);
            }
            Ok(None)
        })
        .await
    }

    async fn update(&self, session: &QuizSession) -> Result<(), StoreError> {
        track_store_operation(self.backend_name(), "update", async {
            let mut sessions = self.sessions.write().await;
            let entry = sessions
                .get_mut(&session.session_id)
                .filter(|entry| entry.expires_at > Instant::now())
                .ok_or_else(|| StoreError::Missing {
                    session_id: session.session_id.clone(),
                })?;
            check_version(session, entry.session.version)?;
            entry.session = session.clone();
            Ok(())
        })
        .await
    }

    async fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        track_store_operation(self.backend_name(), "delete", async {
            let mut sessions = self.sessions.write().await;
            Ok(sessions
                .remove(session_id)
                .is_some_and(|entry| entry.expires_at > Instant::now()))
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let mut sessions = self.sessions.write().await;
        let now = Instant::now();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.expires_at > now);
        Ok(before - sessions.len())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

const UPDATE_IF_VERSION_SCRIPT: &str = r#"
    local current = redis.call('GET', KEYS[1])
    if not current then
        return -1
    end

    local stored = tonumber(cjson.decode(current)['version']) or 0
    if stored + 1 ~= tonumber(ARGV[2]) then
        return 0
    end

    redis.call('SET', KEYS[1], ARGV[1], 'KEEPTTL')
    return 1
"#;

/// Shared store backed by Redis; expiry uses native key TTL.
pub struct RedisSessionStore {
    redis: ConnectionManager,
    ttl: Duration,
    timeout: Duration,
}

impl RedisSessionStore {
    pub fn new(redis: ConnectionManager, ttl: Duration, timeout: Duration) -> Self {
        Self {
            redis,
            ttl,
            timeout,
        }
    }

    fn key(session_id: &str) -> String {
        format!("quiz:session:{}", session_id)
    }

    async fn bounded<T, F>(&self, operation: &'static str, future: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, redis::RedisError>>,
    {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout {
                operation,
                timeout: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, session: &QuizSession) -> Result<(), StoreError> {
        track_store_operation(self.backend_name(), "create", async {
            let payload = serde_json::to_string(session)?;
            let mut conn = self.redis.clone();
            let reply: Option<String> = self
                .bounded(
                    "create",
                    redis::cmd("SET")
                        .arg(Self::key(&session.session_id))
                        .arg(payload)
                        .arg("EX")
                        .arg(self.ttl.as_secs().max(1))
                        .arg("NX")
                        .query_async(&mut conn),
                )
                .await?;
            match reply {
                Some(_) => Ok(()),
                None => Err(StoreError::AlreadyExists {
                    session_id: session.session_id.clone(),
                }),
            }
        })
        .await
    }

    async fn get(&self, session_id: &str) -> Result<Option<QuizSession>, StoreError> {
        track_store_operation(self.backend_name(), "get", async {
            let mut conn = self.redis.clone();
            let raw: Option<String> = self
                .bounded(
                    "get",
                    redis::cmd("GET")
                        .arg(Self::key(session_id))
                        .query_async(&mut conn),
                )
                .await?;
            match raw {
                Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn update(&self, session: &QuizSession) -> Result<(), StoreError> {
        track_store_operation(self.backend_name(), "update", async {
            let payload = serde_json::to_string(session)?;
            let mut conn = self.redis.clone();
            let script = redis::Script::new(UPDATE_IF_VERSION_SCRIPT);
            let outcome: i64 = self
                .bounded(
                    "update",
                    script
                        .key(Self::key(&session.session_id))
                        .arg(payload)
                        .arg(session.version)
                        .invoke_async(&mut conn),
                )
                .await?;
            match outcome {
                1 => Ok(()),
                0 => Err(StoreError::Conflict {
                    session_id: session.session_id.clone(),
                }),
                _ => Err(StoreError::Missing {
                    session_id: session.session_id.clone(),
                }),
            }
        })
        .await
    }

    async fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        track_store_operation(self.backend_name(), "delete", async {
            let mut conn = self.redis.clone();
            let removed: i64 = self
                .bounded(
                    "delete",
                    redis::cmd("DEL")
                        .arg(Self::key(session_id))
                        .query_async(&mut conn),
                )
                .await?;
            Ok(removed > 0)
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let _: String = self
            .bounded("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Difficulty, Question};
    use chrono::Utc;

    fn session(id: &str) -> QuizSession {
        let question = Question {
            id: "q_1".to_string(),
            question: "Which service extracts text from scanned documents?".to_string(),
            options: [
                "Amazon Textract".to_string(),
                "Amazon Polly".to_string(),
                "Amazon Lex".to_string(),
                "Amazon Comprehend".to_string(),
            ],
            correct_answer: 0,
            explanation: String::new(),
            difficulty: Difficulty::Beginner,
            topic: "Amazon Textract".to_string(),
            domain: "AI Services".to_string(),
        };
        QuizSession::new(
            id.to_string(),
            10,
            Difficulty::Beginner,
            None,
            question,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn create_get_delete() {
        let store = InMemorySessionStore::new(Duration::from_secs(60));
        store.create(&session("a")).await.unwrap();

        let loaded = store.get("a").await.unwrap().unwrap();
        assert_eq!(loaded.session_id, "a");
        assert!(store.get("b").await.unwrap().is_none());

        assert!(matches!(
            store.create(&session("a")).await,
            Err(StoreError::AlreadyExists { .. })
        ));

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_requires_next_version() {
        let store = InMemorySessionStore::new(Duration::from_secs(60));
        let mut s = session("a");
        store.create(&s).await.unwrap();

        s.score = 100;
        s.version = 1;
        store.update(&s).await.unwrap();

        // stale writer still holding version 1
        let stale = s.clone();
        s.version = 2;
        store.update(&s).await.unwrap();
        assert!(matches!(
            store.update(&stale).await,
            Err(StoreError::Conflict { .. })
        ));

        assert_eq!(store.get("a").await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn update_of_unknown_session_is_missing() {
        let store = InMemorySessionStore::new(Duration::from_secs(60));
        let mut s = session("ghost");
        s.version = 1;
        assert!(matches!(
            store.update(&s).await,
            Err(StoreError::Missing { .. })
        ));
    }

    #[tokio::test]
    async fn expired_sessions_vanish() {
        let store = InMemorySessionStore::new(Duration::from_millis(20));
        store.create(&session("a")).await.unwrap();
        store.create(&session("b")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.get("a").await.unwrap().is_none());
        assert_eq!(store.len().await, 1);
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.is_empty().await);
    }
}
