//! Storage abstraction layer for deploy-redis
//!
//! The revision store only needs a handful of key/value and sorted-set
//! primitives. Any engine exposing them can back it.

use async_trait::async_trait;
use bytes::Bytes;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid value at {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Generic key/value + sorted-set store interface
///
/// Semantics follow Redis: `zadd` upserts the member's score, and
/// `zrange`/`zrevrange` accept negative indices counted from the end
/// (`-1` is the last element).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get the value stored at `key`
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store `value` at `key`, replacing any previous value
    async fn set(&self, key: &str, value: Bytes) -> Result<()>;

    /// Delete `key` (no-op if absent)
    async fn del(&self, key: &str) -> Result<()>;

    /// Get several keys in one round trip, one slot per requested key
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>>;

    /// Add `member` to the sorted set at `key`, or update its score
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()>;

    /// Members ranked `start..=stop`, ascending by score
    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    /// Members ranked `start..=stop`, descending by score
    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    /// Remove `member` from the sorted set at `key`
    async fn zrem(&self, key: &str, member: &str) -> Result<()>;
}

/// Decode a stored value as UTF-8 text
pub(crate) fn utf8_value(key: &str, value: Bytes) -> Result<String> {
    String::from_utf8(value.to_vec()).map_err(|e| StorageError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
