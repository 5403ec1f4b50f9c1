//! # Stepwise Infrastructure
//!
//! Concrete implementations of the ports defined in `stepwise-core`: window
//! stores, the inference provider, repositories and token validation.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external services, in-memory only
//! - `postgres` - PostgreSQL repositories and window store via SeaORM
//! - `redis` - Redis window store
//! - `auth` - JWT validation
//! - `anthropic` - Anthropic Messages API provider

pub mod database;
pub mod window_store;

#[cfg(feature = "auth")]
pub mod auth;

#[cfg(feature = "anthropic")]
pub mod inference;

// Re-exports - In-Memory
pub use database::{InMemoryAssignmentRepository, InMemoryStepRepository};
pub use window_store::InMemoryWindowStore;

#[cfg(feature = "auth")]
pub use auth::{JwtConfig, JwtTokenService};

#[cfg(feature = "anthropic")]
pub use inference::{AnthropicConfig, AnthropicProvider};

#[cfg(feature = "postgres")]
pub use database::{DatabaseConfig, PostgresAssignmentRepository, PostgresStepRepository};
#[cfg(feature = "postgres")]
pub use window_store::PostgresWindowStore;

#[cfg(feature = "redis")]
pub use window_store::{RedisConfig, RedisWindowStore, RedisWindowStoreConfig};
