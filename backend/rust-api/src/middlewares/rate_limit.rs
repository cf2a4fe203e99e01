use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::handlers::ApiError;
use crate::services::AppState;

const LIMIT_EXCEEDED_MESSAGE: &str = "Too many requests from this IP, please try again later.";

// Stale windows are swept once the map grows past this many clients
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// Window state after counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the window resets.
    pub reset_secs: u64,
    pub allowed: bool,
}

impl RateDecision {
    fn from_count(limit: u32, count: u64, reset_secs: u64) -> Self {
        Self {
            limit,
            remaining: u64::from(limit).saturating_sub(count) as u32,
            reset_secs,
            allowed: count <= u64::from(limit),
        }
    }

    fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(
            HeaderName::from_static("ratelimit-limit"),
            HeaderValue::from(self.limit),
        );
        headers.insert(
            HeaderName::from_static("ratelimit-remaining"),
            HeaderValue::from(self.remaining),
        );
        headers.insert(
            HeaderName::from_static("ratelimit-reset"),
            HeaderValue::from(self.reset_secs),
        );
        if !self.allowed {
            headers.insert(
                axum::http::header::RETRY_AFTER,
                HeaderValue::from(self.reset_secs),
            );
        }
    }
}

/// Fixed-window request counter keyed by client.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn hit(&self, key: &str) -> anyhow::Result<RateDecision>;

    fn backend_name(&self) -> &'static str;
}

struct Window {
    count: u64,
    started: Instant,
}

/// Single-process counters. Each instance of the API limits independently.
pub struct InMemoryRateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    limit: u32,
    window: Duration,
}

impl InMemoryRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limit,
            window,
        }
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn hit(&self, key: &str) -> anyhow::Result<RateDecision> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| anyhow::anyhow!("rate limit table poisoned"))?;
        let now = Instant::now();

        if windows.len() >= MAX_TRACKED_CLIENTS {
            let window = self.window;
            windows.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.count = 0;
            entry.started = now;
        }
        entry.count += 1;

        let reset = self.window.saturating_sub(now.duration_since(entry.started));
        Ok(RateDecision::from_count(
            self.limit,
            entry.count,
            reset.as_secs().max(1),
        ))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

const FIXED_WINDOW_SCRIPT: &str = r#"
    local count = redis.call('INCR', KEYS[1])
    local ttl = redis.call('TTL', KEYS[1])
    if ttl < 0 then
        redis.call('EXPIRE', KEYS[1], ARGV[1])
        ttl = tonumber(ARGV[1])
    end
    return {count, ttl}
"#;

/// Counters shared by every instance pointed at the same Redis.
pub struct RedisRateLimiter {
    redis: ConnectionManager,
    limit: u32,
    window: Duration,
    timeout: Duration,
}

impl RedisRateLimiter {
    pub fn new(redis: ConnectionManager, limit: u32, window: Duration, timeout: Duration) -> Self {
        Self {
            redis,
            limit,
            window,
            timeout,
        }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn hit(&self, key: &str) -> anyhow::Result<RateDecision> {
        let mut conn = self.redis.clone();
        let script = redis::Script::new(FIXED_WINDOW_SCRIPT);
        let (count, ttl): (u64, i64) = tokio::time::timeout(
            self.timeout,
            script
                .key(key)
                .arg(self.window.as_secs().max(1))
                .invoke_async(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("rate limit check timed out after {:?}", self.timeout))??;

        Ok(RateDecision::from_count(
            self.limit,
            count,
            ttl.max(1) as u64,
        ))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

fn extract_client_ip_from(headers: &HeaderMap, extensions: &axum::http::Extensions) -> String {
    // Preferred order: X-Forwarded-For, Forwarded, X-Real-IP, ConnectInfo
    if let Some(v) = headers.get("x-forwarded-for") {
        if let Ok(s) = v.to_str() {
            // comma separated list; the first hop is the client
            return s.split(',').next().unwrap_or(s).trim().to_string();
        }
    }

    if let Some(v) = headers.get("forwarded") {
        if let Ok(s) = v.to_str() {
            for part in s.split([';', ',']) {
                let p = part.trim();
                if let Some(val) = p.strip_prefix("for=") {
                    return val.trim().trim_matches('"').to_string();
                }
            }
        }
    }

    if let Some(v) = headers.get("x-real-ip") {
        if let Ok(s) = v.to_str() {
            return s.trim().to_string();
        }
    }

    if let Some(ci) = extensions.get::<ConnectInfo<SocketAddr>>() {
        return ci.0.ip().to_string();
    }

    "unknown".to_string()
}

/// Counts the request against the client's window and answers 429 once it is spent.
/// A failing limiter backend lets the request through.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.server.rate_limit_enabled {
        return next.run(request).await;
    }

    let client_ip = extract_client_ip_from(request.headers(), request.extensions());

    let decision = match state
        .rate_limiter
        .hit(&format!("ratelimit:ip:{}", client_ip))
        .await
    {
        Ok(decision) => decision,
        Err(e) => {
            tracing::error!(
                "Rate limit check failed ({}): {:#}",
                state.rate_limiter.backend_name(),
                e
            );
            return next.run(request).await;
        }
    };

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        tracing::warn!("Rate limit exceeded for IP: {}", client_ip);
        ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMIT_EXCEEDED",
            LIMIT_EXCEEDED_MESSAGE,
        )
        .into_response()
    };
    decision.apply_headers(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ConnectInfo;
    use axum::http::HeaderMap;
    use std::net::SocketAddr;

    #[test]
    fn test_extract_client_ip_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4, 10.0.0.1".parse().unwrap());
        let exts = axum::http::Extensions::new();
        assert_eq!(extract_client_ip_from(&headers, &exts), "1.2.3.4");
    }

    #[test]
    fn test_extract_client_ip_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert("forwarded", "for=5.6.7.8;proto=http".parse().unwrap());
        let exts = axum::http::Extensions::new();
        assert_eq!(extract_client_ip_from(&headers, &exts), "5.6.7.8");
    }

    #[test]
    fn test_extract_client_ip_x_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "9.9.9.9".parse().unwrap());
        let exts = axum::http::Extensions::new();
        assert_eq!(extract_client_ip_from(&headers, &exts), "9.9.9.9");
    }

    #[test]
    fn test_extract_client_ip_connectinfo() {
        let headers = HeaderMap::new();
        let mut exts = axum::http::Extensions::new();
        exts.insert(ConnectInfo::<SocketAddr>("7.7.7.7:1234".parse().unwrap()));
        assert_eq!(extract_client_ip_from(&headers, &exts), "7.7.7.7");
    }

    #[test]
    fn test_extract_client_ip_unknown() {
        let headers = HeaderMap::new();
        let exts = axum::http::Extensions::new();
        assert_eq!(extract_client_ip_from(&headers, &exts), "unknown");
    }

    #[tokio::test]
    async fn test_memory_limiter_blocks_after_limit() {
        let limiter = InMemoryRateLimiter::new(2, Duration::from_secs(60));

        let first = limiter.hit("ratelimit:ip:a").await.unwrap();
        let second = limiter.hit("ratelimit:ip:a").await.unwrap();
        let third = limiter.hit("ratelimit:ip:a").await.unwrap();

        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
        assert!(third.reset_secs <= 60);

        // other clients have their own window
        assert!(limiter.hit("ratelimit:ip:b").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_memory_limiter_window_resets() {
        let limiter = InMemoryRateLimiter::new(1, Duration::from_millis(20));

        assert!(limiter.hit("k").await.unwrap().allowed);
        assert!(!limiter.hit("k").await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(limiter.hit("k").await.unwrap().allowed);
    }

    #[test]
    fn test_rejected_decision_sets_retry_after() {
        let decision = RateDecision::from_count(3, 4, 12);
        let mut headers = HeaderMap::new();
        decision.apply_headers(&mut headers);

        assert_eq!(headers["ratelimit-limit"], "3");
        assert_eq!(headers["ratelimit-remaining"], "0");
        assert_eq!(headers["ratelimit-reset"], "12");
        assert_eq!(headers["retry-after"], "12");
    }
}
