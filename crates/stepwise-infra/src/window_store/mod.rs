//! Window store implementations - in-memory, Redis and PostgreSQL.

mod memory;

pub use memory::InMemoryWindowStore;

#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub use self::redis::{RedisConfig, RedisWindowStore, RedisWindowStoreConfig};

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "postgres")]
pub use postgres::PostgresWindowStore;
