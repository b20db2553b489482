// src/services/rate_limiter.rs
//! Sliding-window rate limiting for generation requests, keyed by client IP.

use crate::config::{Enforcement, RateLimitConfig};
use crate::errors::RedesignError;
use crate::models::RateLimitOutcome;
use async_trait::async_trait;
use log::{debug, info, warn};
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

const KEY_PREFIX: &str = "redesigner:ratelimit";

// Drops entries older than the window, then admits the request only if the
// remaining count is under the limit. Denied requests are not recorded.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
local count = redis.call('ZCARD', key)
if count < limit then
    redis.call('ZADD', key, now, member)
    redis.call('PEXPIRE', key, window)
    return {1, limit - count - 1}
end
redis.call('PEXPIRE', key, window)
return {0, 0}
"#;

#[async_trait]
pub trait SlidingWindowStore: Send + Sync {
    /// Count one request against `key` if it fits in the window.
    async fn consume(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<RateLimitOutcome, RedesignError>;
}

pub struct RedisWindowStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisWindowStore {
    pub async fn new(redis_url: &str) -> Result<Self, RedesignError> {
        let client = Client::open(redis_url)?;
        let mut conn = ConnectionManager::new(client).await?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;

        Ok(Self {
            conn,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
        })
    }
}

#[async_trait]
impl SlidingWindowStore for RedisWindowStore {
    async fn consume(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<RateLimitOutcome, RedesignError> {
        let mut conn = self.conn.clone();
        let now_ms = chrono::Utc::now().timestamp_millis();

        let (allowed, remaining): (i64, i64) = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(window.as_millis() as u64)
            .arg(limit)
            .arg(format!("{}:{}", now_ms, Uuid::new_v4()))
            .invoke_async(&mut conn)
            .await?;

        Ok(RateLimitOutcome {
            allowed: allowed == 1,
            limit,
            remaining: remaining.max(0) as u64,
        })
    }
}

/// Single-process store; counts are lost on restart and not shared between replicas.
#[derive(Default)]
pub struct InMemoryWindowStore {
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn consume_at(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        now: Instant,
    ) -> RateLimitOutcome {
        let mut hits = self.hits.lock().await;
        let entries = hits.entry(key.to_string()).or_default();

        while let Some(&oldest) = entries.front() {
            if now.saturating_duration_since(oldest) >= window {
                entries.pop_front();
            } else {
                break;
            }
        }

        let count = entries.len() as u64;
        if count < limit {
            entries.push_back(now);
            RateLimitOutcome {
                allowed: true,
                limit,
                remaining: limit - count - 1,
            }
        } else {
            RateLimitOutcome {
                allowed: false,
                limit,
                remaining: 0,
            }
        }
    }
}

#[async_trait]
impl SlidingWindowStore for InMemoryWindowStore {
    async fn consume(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<RateLimitOutcome, RedesignError> {
        Ok(self.consume_at(key, limit, window, Instant::now()).await)
    }
}

/// Gate in front of the generation route.
pub struct RateLimiter {
    enforcement: Enforcement,
    store: Option<Arc<dyn SlidingWindowStore>>,
    max_requests: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn SlidingWindowStore>, max_requests: u64, window: Duration) -> Self {
        Self {
            enforcement: Enforcement::Enabled,
            store: Some(store),
            max_requests,
            window,
        }
    }

    /// A gate that lets everything through.
    pub fn disabled(max_requests: u64, window: Duration) -> Self {
        Self {
            enforcement: Enforcement::Disabled,
            store: None,
            max_requests,
            window,
        }
    }

    pub async fn from_config(config: &RateLimitConfig) -> Result<Self, RedesignError> {
        match (config.enforcement, config.redis_url.as_deref()) {
            (Enforcement::Enabled, Some(url)) => {
                let store = RedisWindowStore::new(url).await?;
                info!(
                    "Rate limiting enabled: {} requests per {:?}",
                    config.max_requests, config.window
                );
                Ok(Self::new(Arc::new(store), config.max_requests, config.window))
            }
            (Enforcement::Enabled, None) => Err(RedesignError::Config(
                "rate limiting is enabled but no Redis URL is configured".into(),
            )),
            (Enforcement::Disabled, _) => {
                warn!("Rate limiting disabled; generation requests are not throttled");
                Ok(Self::disabled(config.max_requests, config.window))
            }
        }
    }

    pub fn enforcement(&self) -> Enforcement {
        self.enforcement
    }

    pub async fn check_and_consume(
        &self,
        client_id: &str,
    ) -> Result<RateLimitOutcome, RedesignError> {
        let store = match (self.enforcement, &self.store) {
            (Enforcement::Enabled, Some(store)) => store,
            _ => {
                return Ok(RateLimitOutcome {
                    allowed: true,
                    limit: self.max_requests,
                    remaining: self.max_requests,
                });
            }
        };

        let key = format!("{}:{}", KEY_PREFIX, client_id);
        let outcome = store.consume(&key, self.max_requests, self.window).await?;
        debug!(
            "Rate limit for {}: allowed={} remaining={}/{}",
            client_id, outcome.allowed, outcome.remaining, outcome.limit
        );
        Ok(outcome)
    }
}
