//! Redis cache backend.
//!
//! Stores the encoded user bytes under their cache key with a millisecond
//! TTL. Every Redis failure is reported as `CacheError::Unavailable`; the
//! read-through layer decides what that means.

use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Pool, PoolConfig, Runtime};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tessel_core::{CacheError, CacheKey, CacheResult, HealthCheck, RequestContext};
use tessel_storage::CacheBackend;

use crate::error::{ApiError, ApiResult};

/// Redis connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// host:port
    pub addr: String,
    pub password: Option<String>,
    pub db: i64,
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".to_string(),
            password: None,
            db: 0,
            pool_size: 10,
        }
    }
}

impl RedisConfig {
    /// Connection URL in `redis://[:password@]addr/db` form.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}/{}", password, self.addr, self.db),
            None => format!("redis://{}/{}", self.addr, self.db),
        }
    }

    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = deadpool_redis::Config::from_url(self.url());
        cfg.pool = Some(PoolConfig::new(self.pool_size));
        cfg.create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ApiError::internal_error(format!("Failed to create Redis pool: {}", e)))
    }
}

fn unavailable(err: impl std::fmt::Display) -> CacheError {
    CacheError::Unavailable {
        reason: err.to_string(),
    }
}

/// Cache backend over a deadpool-redis pool.
#[derive(Clone)]
pub struct RedisCacheBackend {
    pool: Pool,
}

impl RedisCacheBackend {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &RedisConfig) -> ApiResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    async fn conn(&self) -> CacheResult<deadpool_redis::Connection> {
        self.pool.get().await.map_err(unavailable)
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, _ctx: &RequestContext, key: &CacheKey) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        conn.get::<_, Option<Vec<u8>>>(key.as_str())
            .await
            .map_err(unavailable)
    }

    async fn set(
        &self,
        _ctx: &RequestContext,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Duration,
    ) -> CacheResult<()> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.conn().await?;
        conn.pset_ex::<_, _, ()>(key.as_str(), value, millis)
            .await
            .map_err(unavailable)
    }

    async fn delete(&self, _ctx: &RequestContext, key: &CacheKey) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key.as_str()).await.map_err(unavailable)
    }

    async fn ping(&self) -> HealthCheck {
        let start = Instant::now();
        let result = match self.conn().await {
            Ok(mut conn) => redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .map_err(unavailable),
            Err(e) => Err(e),
        };
        let elapsed = start.elapsed().as_millis() as u64;

        match result {
            Ok(_) => HealthCheck::healthy("redis")
                .with_response_time(elapsed)
                .with_metadata("backend", "redis".into())
                .with_metadata("pool_size", self.pool.status().size.into()),
            Err(e) => HealthCheck::unhealthy("redis", e.to_string()).with_response_time(elapsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_without_password() {
        let config = RedisConfig::default();
        assert_eq!(config.url(), "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn test_url_with_password_and_db() {
        let config = RedisConfig {
            addr: "cache:6380".to_string(),
            password: Some("secret".to_string()),
            db: 3,
            ..Default::default()
        };
        assert_eq!(config.url(), "redis://:secret@cache:6380/3");
    }

    #[tokio::test]
    async fn test_unreachable_redis_reports_unavailable() -> Result<(), String> {
        let config = RedisConfig {
            addr: "127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let cache = RedisCacheBackend::from_config(&config).map_err(|e| e.message)?;
        let ctx = RequestContext::background();
        let key = CacheKey::user(tessel_core::UserId::new(1));

        let err = cache.get(&ctx, &key).await.err().ok_or("expected an error")?;
        assert!(matches!(err, CacheError::Unavailable { .. }));
        assert_eq!(
            cache.ping().await.status,
            tessel_core::HealthStatus::Unhealthy
        );
        Ok(())
    }
}
