//! In-memory cache backend with per-entry TTL.
//!
//! An expired entry is dropped when it is next read, and every insert sweeps
//! the map of expired entries. Time is taken from `tokio::time`, so
//! paused-clock tests can advance past a TTL.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tessel_core::{CacheError, CacheKey, CacheResult, HealthCheck, RequestContext};
use tokio::time::Instant;

use super::traits::CacheBackend;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CacheResult<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries.lock().map_err(|_| CacheError::Unavailable {
            reason: "cache lock poisoned".to_string(),
        })
    }

    /// Store raw bytes without going through the read-through layer.
    pub fn insert_raw(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    /// Peek at a live entry.
    pub fn peek(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(key.as_str())
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone())
    }

    /// Remaining TTL of a live entry.
    pub fn ttl(&self, key: &CacheKey) -> Option<Duration> {
        let entries = self.entries.lock().ok()?;
        let now = Instant::now();
        entries
            .get(key.as_str())
            .filter(|e| e.expires_at > now)
            .map(|e| e.expires_at - now)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|e| e.values().filter(|entry| entry.expires_at > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, _ctx: &RequestContext, key: &CacheKey) -> CacheResult<Option<Vec<u8>>> {
        let mut entries = self.lock()?;
        let expired = match entries.get(key.as_str()) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key.as_str());
        }
        Ok(None)
    }

    async fn set(
        &self,
        _ctx: &RequestContext,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Duration,
    ) -> CacheResult<()> {
        self.insert_raw(key, value, ttl)
    }

    async fn delete(&self, _ctx: &RequestContext, key: &CacheKey) -> CacheResult<()> {
        self.lock()?.remove(key.as_str());
        Ok(())
    }

    async fn ping(&self) -> HealthCheck {
        match self.lock() {
            Ok(entries) => HealthCheck::healthy("cache")
                .with_metadata("backend", "memory".into())
                .with_metadata("entries", entries.len().into()),
            Err(e) => HealthCheck::unhealthy("cache", e.to_string()),
        }
    }
}
