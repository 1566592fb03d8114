//! In-process dedup cache backed by a moka TTL cache.
//!
//! Each entry carries its own TTL through a moka `Expiry` policy, and
//! `set_if_absent` goes through moka's entry API so concurrent callers
//! racing on one key see exactly one winner. The cache has no size bound:
//! markers leave only when their TTL runs out or they are deleted.

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::domain::ports::{CacheError, DedupCache};

#[derive(Debug, Clone)]
struct Marker {
    value: String,
    ttl: Duration,
}

struct MarkerExpiry;

impl Expiry<String, Marker> for MarkerExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Marker,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// TTL key-value store living inside the process.
pub struct InMemoryDedupCache {
    entries: Cache<String, Marker>,
    available: AtomicBool,
}

impl InMemoryDedupCache {
    pub fn new() -> Self {
        let entries = Cache::builder().expire_after(MarkerExpiry).build();
        Self {
            entries,
            available: AtomicBool::new(true),
        }
    }

    /// Make every operation fail with `CacheError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Drop expired entries eagerly.
    pub async fn purge_expired(&self) {
        self.entries.run_pending_tasks().await;
    }

    fn ensure_available(&self) -> Result<(), CacheError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable("in-memory cache disabled".to_string()))
        }
    }
}

impl Default for InMemoryDedupCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DedupCache for InMemoryDedupCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.ensure_available()?;
        Ok(self.entries.get(key).await.map(|m| m.value))
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        self.ensure_available()?;
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert(Marker {
                value: value.to_string(),
                ttl,
            })
            .await;
        Ok(entry.is_fresh())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.ensure_available()?;
        Ok(self.entries.remove(key).await.is_some())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.ensure_available()
    }
}
