//! Redis window store: one sorted set per key, scored by admission time in
//! milliseconds.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use uuid::Uuid;

use stepwise_core::domain::{Decision, RateLimitKey, WindowPolicy};
use stepwise_core::ports::{WindowStore, WindowStoreError};

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    pub connect_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            connect_timeout: Duration::from_secs(
                std::env::var("REDIS_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisWindowStoreConfig {
    pub redis: RedisConfig,
    /// Namespace for window keys
    pub key_prefix: String,
}

impl Default for RedisWindowStoreConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            key_prefix: "ratelimit".to_string(),
        }
    }
}

impl RedisWindowStoreConfig {
    pub fn from_env() -> Self {
        Self {
            redis: RedisConfig::from_env(),
            key_prefix: std::env::var("RATE_LIMIT_KEY_PREFIX")
                .unwrap_or_else(|_| "ratelimit".to_string()),
        }
    }
}

// KEYS[1] window key; ARGV: window_ms, limit, member nonce.
// Uses the server clock so every instance agrees on "now".
// Returns {admitted, count, oldest_ms or -1, now_ms}.
const CHECK_AND_RECORD: &str = r#"
local key = KEYS[1]
local window_ms = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])

local t = redis.call('TIME')
local now_ms = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)

redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. (now_ms - window_ms))
local count = redis.call('ZCARD', key)

local admitted = 0
if count < limit then
    redis.call('ZADD', key, now_ms, now_ms .. '-' .. ARGV[3])
    redis.call('PEXPIRE', key, window_ms)
    admitted = 1
    count = count + 1
end

local oldest_ms = -1
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if oldest[2] then
    oldest_ms = tonumber(oldest[2])
end

return {admitted, count, oldest_ms, now_ms}
"#;

/// Redis-backed window store, shared by every service instance.
pub struct RedisWindowStore {
    conn: ConnectionManager,
    config: RedisWindowStoreConfig,
    script: Script,
}

fn backend(e: redis::RedisError) -> WindowStoreError {
    WindowStoreError::Unavailable(e.to_string())
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, WindowStoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| WindowStoreError::Corrupt(format!("timestamp out of range: {ms}")))
}

impl RedisWindowStore {
    pub async fn new(config: RedisWindowStoreConfig) -> Result<Self, WindowStoreError> {
        let client = Client::open(config.redis.url.as_str()).map_err(backend)?;

        let conn = tokio::time::timeout(config.redis.connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| WindowStoreError::Unavailable("Connection timed out".to_string()))?
            .map_err(backend)?;

        tracing::info!(url = %config.redis.url, "Connected to Redis window store");

        Ok(Self {
            conn,
            config,
            script: Script::new(CHECK_AND_RECORD),
        })
    }

    pub async fn from_env() -> Result<Self, WindowStoreError> {
        Self::new(RedisWindowStoreConfig::from_env()).await
    }

    fn make_key(&self, key: &RateLimitKey) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    fn member(at: DateTime<Utc>) -> String {
        format!("{}-{}", millis(at), Uuid::new_v4())
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn count(&self, key: &RateLimitKey, since: DateTime<Utc>) -> Result<u64, WindowStoreError> {
        let mut conn = self.conn.clone();
        let count: u64 = conn
            .zcount(self.make_key(key), millis(since), "+inf")
            .await
            .map_err(backend)?;
        Ok(count)
    }

    async fn oldest(
        &self,
        key: &RateLimitKey,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, WindowStoreError> {
        let mut conn = self.conn.clone();
        let first: Vec<(String, i64)> = conn
            .zrangebyscore_limit_withscores(self.make_key(key), millis(since), "+inf", 0, 1)
            .await
            .map_err(backend)?;

        first.first().map(|(_, ms)| from_millis(*ms)).transpose()
    }

    async fn record(&self, key: &RateLimitKey, at: DateTime<Utc>) -> Result<(), WindowStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .zadd(self.make_key(key), Self::member(at), millis(at))
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, WindowStoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:*", self.config.key_prefix);
        let max = format!("({}", millis(before));
        let mut cursor = 0u64;
        let mut removed = 0u64;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(backend)?;

            for key in keys {
                let n: u64 = conn.zrembyscore(&key, "-inf", &max).await.map_err(backend)?;
                removed += n;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }

    async fn check_and_record(
        &self,
        key: &RateLimitKey,
        policy: &WindowPolicy,
        _now: DateTime<Utc>,
    ) -> Result<Decision, WindowStoreError> {
        let mut conn = self.conn.clone();

        let result: Vec<i64> = self
            .script
            .key(self.make_key(key))
            .arg(policy.window().as_millis() as u64)
            .arg(policy.limit())
            .arg(Uuid::new_v4().to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        let [admitted, _count, oldest_ms, now_ms] = result[..] else {
            return Err(WindowStoreError::Corrupt(format!(
                "unexpected script reply: {result:?}"
            )));
        };

        if admitted == 1 {
            return Ok(Decision::Admitted);
        }

        let now = from_millis(now_ms)?;
        let oldest = if oldest_ms < 0 {
            None
        } else {
            Some(from_millis(oldest_ms)?)
        };
        Ok(Decision::rejected(policy, oldest, now))
    }
}
