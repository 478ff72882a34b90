//! Cache backend trait and cache statistics.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tessel_core::{CacheKey, CacheResult, HealthCheck, RequestContext};

/// Cache backend trait for pluggable cache implementations.
///
/// Values are opaque bytes; the read-through layer owns serialization.
/// Implementations should be thread-safe and support concurrent access.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value from the cache. `Ok(None)` is a miss, never an error.
    async fn get(&self, ctx: &RequestContext, key: &CacheKey) -> CacheResult<Option<Vec<u8>>>;

    /// Store a value with a time-to-live, replacing any previous value.
    async fn set(
        &self,
        ctx: &RequestContext,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Duration,
    ) -> CacheResult<()>;

    /// Delete a value. Deleting an absent key succeeds.
    async fn delete(&self, ctx: &RequestContext, key: &CacheKey) -> CacheResult<()>;

    async fn ping(&self) -> HealthCheck;
}

/// Statistics about cache usage, as seen by the read-through layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads answered from the cache.
    pub hits: u64,
    /// Reads that found no entry.
    pub misses: u64,
    /// Reads whose cache lookup failed.
    pub errors: u64,
    /// Reads whose cached bytes did not decode.
    pub corrupt: u64,
    pub populations: u64,
    pub population_failures: u64,
    pub invalidations: u64,
    pub invalidation_failures: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0) over all lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.errors + self.corrupt;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_counts_every_lookup_outcome() {
        let stats = CacheStats {
            hits: 2,
            misses: 1,
            errors: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
