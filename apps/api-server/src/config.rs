//! Application configuration loaded from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use stepwise_core::{DomainError, RelayConfig};
use stepwise_core::domain::WindowPolicy;

#[cfg(feature = "postgres")]
use stepwise_infra::DatabaseConfig;

/// Where admission events are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStoreKind {
    Memory,
    Redis,
    Postgres,
}

impl FromStr for WindowStoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("unknown window store '{other}'")),
        }
    }
}

/// Admission policies per gated action.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub parse: WindowPolicy,
    pub chat: WindowPolicy,
}

impl RateLimits {
    /// Longest window of any policy; events older than this never matter.
    pub fn longest_window(&self) -> Duration {
        self.parse.window().max(self.chat.window())
    }
}

/// Output budgets per action.
#[derive(Debug, Clone, Copy)]
pub struct TokenBudgets {
    pub parse: u32,
    pub chat: u32,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    #[cfg(feature = "postgres")]
    pub database: Option<DatabaseConfig>,
    pub window_store: WindowStoreKind,
    pub limits: RateLimits,
    pub budgets: TokenBudgets,
    pub relay: RelayConfig,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: usize,
    pub incident_webhook_url: Option<String>,
}

fn parsed<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

/// `limit` per `window_secs`. A missing, unparsable or zero window falls back
/// to the default.
fn policy(prefix: &str, default_limit: u32, default_window_secs: u64) -> Result<WindowPolicy, DomainError> {
    let limit = parsed(&format!("RATE_LIMIT_{prefix}_MAX")).unwrap_or(default_limit);
    let window_secs = parsed::<u64>(&format!("RATE_LIMIT_{prefix}_WINDOW_SECS"))
        .filter(|secs| *secs > 0)
        .unwrap_or(default_window_secs);

    WindowPolicy::new(limit, Duration::from_secs(window_secs))
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, DomainError> {
        let window_store = env::var("WINDOW_STORE")
            .ok()
            .and_then(|s| {
                s.parse()
                    .map_err(|e: String| tracing::warn!(error = %e, "Falling back to in-memory window store"))
                    .ok()
            })
            .unwrap_or(WindowStoreKind::Memory);

        let relay = RelayConfig {
            buffer: parsed("RELAY_BUFFER").unwrap_or(16),
            max_duration: parsed::<u64>("RELAY_MAX_DURATION_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        };

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parsed("PORT").unwrap_or(8080),
            #[cfg(feature = "postgres")]
            database: DatabaseConfig::from_env(),
            window_store,
            limits: RateLimits {
                parse: policy("PARSE", 1, 24 * 60 * 60)?,
                chat: policy("CHAT", 20, 5 * 60)?,
            },
            budgets: TokenBudgets {
                parse: parsed("PARSE_MAX_TOKENS").unwrap_or(4096),
                chat: parsed("CHAT_MAX_TOKENS").unwrap_or(2048),
            },
            relay,
            max_upload_bytes: parsed("MAX_UPLOAD_BYTES").unwrap_or(32 * 1024 * 1024),
            incident_webhook_url: env::var("INCIDENT_WEBHOOK_URL").ok().filter(|u| !u.is_empty()),
        })
    }
}
