use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Cache failure kinds.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
}

/// TTL-capable key-value store used for deduplication.
///
/// `set_if_absent` must be atomic: it is the only concurrency control the
/// publisher and the consumer group rely on.
#[async_trait]
pub trait DedupCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value` under `key` for `ttl` unless a live entry exists.
    ///
    /// Returns `true` when the value was stored.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, CacheError>;

    /// Returns `true` when a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Connectivity check.
    async fn ping(&self) -> Result<(), CacheError>;
}

/// Key of the marker written after a successful publish.
pub fn published_key(event_id: &str) -> String {
    format!("event:{event_id}")
}

/// Key of the marker written before an event is dispatched.
pub fn processed_key(event_id: &str) -> String {
    format!("processed:{event_id}")
}
