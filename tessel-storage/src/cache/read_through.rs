//! Read-through user cache with asynchronous population.
//!
//! Reads try the cache first and fall back to the backing store on a miss,
//! a cache error or an undecodable entry. A successful store read returns
//! immediately and populates the cache from a detached task. Writes go to
//! the store and then delete the cache key before returning.
//!
//! A population that was already in flight when a write invalidated the key
//! may still land afterwards. The stale entry lives until its TTL expires or
//! the next write deletes it.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tessel_core::{
    codec, CacheError, CacheKey, HealthCheck, NewUser, RequestContext, TesselError,
    TesselResult, TracedOperation, TracerHandle, User, UserId, UserUpdate,
};
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::traits::{CacheBackend, CacheStats};
use crate::store::UserStore;

/// Default lifetime of a cached user.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Configuration for the read-through cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL for cached entries.
    pub ttl: Duration,
    /// Deadline of a detached population task.
    pub population_timeout: Duration,
    /// Deadline of the cache delete that follows a write.
    pub invalidation_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            population_timeout: Duration::from_secs(5),
            invalidation_timeout: Duration::from_secs(2),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_population_timeout(mut self, timeout: Duration) -> Self {
        self.population_timeout = timeout;
        self
    }

    pub fn with_invalidation_timeout(mut self, timeout: Duration) -> Self {
        self.invalidation_timeout = timeout;
        self
    }
}

// ============================================================================
// STATS AND POPULATION TRACKING
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    corrupt: AtomicU64,
    populations: AtomicU64,
    population_failures: AtomicU64,
    invalidations: AtomicU64,
    invalidation_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            corrupt: self.corrupt.load(Ordering::Relaxed),
            populations: self.populations.load(Ordering::Relaxed),
            population_failures: self.population_failures.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            invalidation_failures: self.invalidation_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    counters: Counters,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Held by a population task for its whole lifetime.
struct InFlight(Arc<Shared>);

impl InFlight {
    fn begin(shared: &Arc<Shared>) -> Self {
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(shared))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

// ============================================================================
// CACHED USER STORE
// ============================================================================

type CacheSetArgs = (CacheKey, Vec<u8>);

#[derive(Clone)]
struct Operations {
    cache_get: TracedOperation<CacheKey, Option<Vec<u8>>, CacheError>,
    cache_set: TracedOperation<CacheSetArgs, (), CacheError>,
    cache_delete: TracedOperation<CacheKey, (), CacheError>,
    find_by_id: TracedOperation<UserId, User, TesselError>,
    create: TracedOperation<NewUser, User, TesselError>,
    update: TracedOperation<UserUpdate, User, TesselError>,
    soft_delete: TracedOperation<UserId, (), TesselError>,
    list: TracedOperation<(), Vec<User>, TesselError>,
}

impl Operations {
    fn wire(
        store: &Arc<dyn UserStore>,
        cache: &Arc<dyn CacheBackend>,
        tracer: &TracerHandle,
        ttl: Duration,
    ) -> Self {
        let key_attr = |_: &RequestContext, key: &CacheKey| {
            vec![KeyValue::new("cache.key", key.to_string())]
        };
        let id_attr = |_: &RequestContext, id: &UserId| {
            vec![KeyValue::new("user.id", id.span_value())]
        };

        let cache_get = {
            let cache = Arc::clone(cache);
            TracedOperation::new("cache.get", tracer.clone(), move |ctx: RequestContext, key: CacheKey| {
                let cache = Arc::clone(&cache);
                async move { ctx.guard(cache.get(&ctx, &key)).await? }
            })
            .with_attributes(key_attr)
        };

        let cache_set = {
            let cache = Arc::clone(cache);
            TracedOperation::new(
                "cache.set",
                tracer.clone(),
                move |ctx: RequestContext, (key, bytes): CacheSetArgs| {
                    let cache = Arc::clone(&cache);
                    async move { ctx.guard(cache.set(&ctx, &key, bytes, ttl)).await? }
                },
            )
            .with_attributes(move |_, (key, bytes): &CacheSetArgs| {
                vec![
                    KeyValue::new("cache.key", key.to_string()),
                    KeyValue::new("cache.value_bytes", bytes.len() as i64),
                    KeyValue::new("cache.ttl_secs", i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)),
                ]
            })
        };

        let cache_delete = {
            let cache = Arc::clone(cache);
            TracedOperation::new("cache.delete", tracer.clone(), move |ctx: RequestContext, key: CacheKey| {
                let cache = Arc::clone(&cache);
                async move { ctx.guard(cache.delete(&ctx, &key)).await? }
            })
            .with_attributes(key_attr)
        };

        let find_by_id = {
            let store = Arc::clone(store);
            TracedOperation::new("store.find_by_id", tracer.clone(), move |ctx: RequestContext, id: UserId| {
                let store = Arc::clone(&store);
                async move {
                    ctx.guard(store.find_by_id(&ctx, id))
                        .await
                        .map_err(|e| e.during("store.find_by_id"))?
                }
            })
            .with_attributes(id_attr)
        };

        let create = {
            let store = Arc::clone(store);
            TracedOperation::new("store.create", tracer.clone(), move |ctx: RequestContext, new: NewUser| {
                let store = Arc::clone(&store);
                async move {
                    ctx.guard(store.create(&ctx, new))
                        .await
                        .map_err(|e| e.during("store.create"))?
                }
            })
        };

        let update = {
            let store = Arc::clone(store);
            TracedOperation::new("store.update", tracer.clone(), move |ctx: RequestContext, update: UserUpdate| {
                let store = Arc::clone(&store);
                async move {
                    ctx.guard(store.update(&ctx, update))
                        .await
                        .map_err(|e| e.during("store.update"))?
                }
            })
            .with_attributes(|_, update: &UserUpdate| {
                vec![KeyValue::new("user.id", update.id.span_value())]
            })
        };

        let soft_delete = {
            let store = Arc::clone(store);
            TracedOperation::new("store.soft_delete", tracer.clone(), move |ctx: RequestContext, id: UserId| {
                let store = Arc::clone(&store);
                async move {
                    ctx.guard(store.soft_delete(&ctx, id))
                        .await
                        .map_err(|e| e.during("store.soft_delete"))?
                }
            })
            .with_attributes(id_attr)
        };

        let list = {
            let store = Arc::clone(store);
            TracedOperation::new("store.list", tracer.clone(), move |ctx: RequestContext, (): ()| {
                let store = Arc::clone(&store);
                async move {
                    ctx.guard(store.list(&ctx))
                        .await
                        .map_err(|e| e.during("store.list"))?
                }
            })
        };

        Self {
            cache_get,
            cache_set,
            cache_delete,
            find_by_id,
            create,
            update,
            soft_delete,
            list,
        }
    }
}

/// User store fronted by a cache.
///
/// Every store and cache call runs as a traced operation under the caller's
/// deadline and cancellation. Cache failures never reach the caller.
#[derive(Clone)]
pub struct CachedUserStore {
    store: Arc<dyn UserStore>,
    cache: Arc<dyn CacheBackend>,
    config: CacheConfig,
    ops: Operations,
    shared: Arc<Shared>,
}

impl CachedUserStore {
    pub fn new(
        store: Arc<dyn UserStore>,
        cache: Arc<dyn CacheBackend>,
        tracer: TracerHandle,
        config: CacheConfig,
    ) -> Self {
        let ops = Operations::wire(&store, &cache, &tracer, config.ttl);
        Self {
            store,
            cache,
            config,
            ops,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        self.shared.counters.snapshot()
    }

    /// Number of population tasks that have not finished yet.
    pub fn populations_in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no population task is in flight.
    ///
    /// Returns false if tasks were still running when `timeout` elapsed.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let idle = self.shared.idle.notified();
            if self.populations_in_flight() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                return self.populations_in_flight() == 0;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------------

    /// Read a user, preferring the cache.
    ///
    /// Only store errors are returned. A cache hit is returned as decoded; a
    /// miss, a cache error or undecodable bytes fall through to the store.
    pub async fn get(&self, ctx: &RequestContext, id: UserId) -> TesselResult<User> {
        let key = CacheKey::user(id);
        let counters = &self.shared.counters;

        match self.ops.cache_get.call(ctx, key.clone()).await {
            Ok(Some(bytes)) => match codec::decode(&bytes) {
                Ok(user) if user.id == id => {
                    Counters::bump(&counters.hits);
                    debug!(key = %key, "cache hit");
                    return Ok(user);
                }
                Ok(user) => {
                    Counters::bump(&counters.corrupt);
                    warn!(
                        trace_id = %ctx.trace_id().unwrap_or_default(),
                        key = %key,
                        cached_id = %user.id,
                        "cached user does not match its key"
                    );
                }
                Err(error) => {
                    Counters::bump(&counters.corrupt);
                    warn!(
                        trace_id = %ctx.trace_id().unwrap_or_default(),
                        key = %key,
                        error = %error,
                        "cached user could not be decoded"
                    );
                }
            },
            Ok(None) => {
                Counters::bump(&counters.misses);
                debug!(key = %key, "cache miss");
            }
            Err(error) => {
                Counters::bump(&counters.errors);
                warn!(
                    trace_id = %ctx.trace_id().unwrap_or_default(),
                    key = %key,
                    error = %error,
                    "cache lookup failed, reading from store"
                );
            }
        }

        let user = self.ops.find_by_id.call(ctx, id).await?;
        self.populate(ctx, key, &user);
        Ok(user)
    }

    /// Spawn a detached task that writes `user` under `key`.
    fn populate(&self, ctx: &RequestContext, key: CacheKey, user: &User) {
        let counters = &self.shared.counters;
        let bytes = match codec::encode(user) {
            Ok(bytes) => bytes,
            Err(error) => {
                Counters::bump(&counters.population_failures);
                warn!(key = %key, error = %error, "cache population skipped");
                return;
            }
        };

        let background = ctx.detached(self.config.population_timeout);
        let cache_set = self.ops.cache_set.clone();
        let in_flight = InFlight::begin(&self.shared);

        tokio::spawn(async move {
            let shared = Arc::clone(&in_flight.0);
            match cache_set.call(&background, (key.clone(), bytes)).await {
                Ok(()) => {
                    Counters::bump(&shared.counters.populations);
                    debug!(key = %key, "cache populated");
                }
                Err(error) => {
                    Counters::bump(&shared.counters.population_failures);
                    warn!(
                        trace_id = %background.trace_id().unwrap_or_default(),
                        key = %key,
                        error = %error,
                        "cache population failed"
                    );
                }
            }
            drop(in_flight);
        });
    }

    /// All live users, read straight from the store.
    pub async fn list(&self, ctx: &RequestContext) -> TesselResult<Vec<User>> {
        self.ops.list.call(ctx, ()).await
    }

    // ------------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------------

    pub async fn create(&self, ctx: &RequestContext, new: NewUser) -> TesselResult<User> {
        new.validate()?;
        let user = self.ops.create.call(ctx, new).await?;
        self.invalidate(ctx, user.id).await;
        Ok(user)
    }

    pub async fn update(&self, ctx: &RequestContext, update: UserUpdate) -> TesselResult<User> {
        update.validate()?;
        let user = self.ops.update.call(ctx, update).await?;
        self.invalidate(ctx, user.id).await;
        Ok(user)
    }

    pub async fn soft_delete(&self, ctx: &RequestContext, id: UserId) -> TesselResult<()> {
        self.ops.soft_delete.call(ctx, id).await?;
        self.invalidate(ctx, id).await;
        Ok(())
    }

    /// Delete the cache key for `id`. Failures are logged and counted.
    ///
    /// Runs on a detached context so a request deadline consumed by the
    /// store call does not skip the delete.
    async fn invalidate(&self, ctx: &RequestContext, id: UserId) {
        let key = CacheKey::user(id);
        let background = ctx.detached(self.config.invalidation_timeout);
        let counters = &self.shared.counters;

        match self.ops.cache_delete.call(&background, key.clone()).await {
            Ok(()) => {
                Counters::bump(&counters.invalidations);
                debug!(key = %key, "cache invalidated");
            }
            Err(error) => {
                Counters::bump(&counters.invalidation_failures);
                warn!(
                    trace_id = %ctx.trace_id().unwrap_or_default(),
                    key = %key,
                    error = %error,
                    "cache invalidation failed"
                );
            }
        }
    }

    /// Health of the store and the cache.
    pub async fn health(&self) -> Vec<HealthCheck> {
        vec![self.store.ping().await, self.cache.ping().await]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCacheBackend;
    use crate::store::InMemoryUserStore;
    use tessel_core::UserStatus;

    fn fixture() -> (CachedUserStore, Arc<InMemoryUserStore>, Arc<InMemoryCacheBackend>) {
        let store = Arc::new(InMemoryUserStore::new());
        let cache = Arc::new(InMemoryCacheBackend::new());
        let cached = CachedUserStore::new(
            store.clone(),
            cache.clone(),
            TracerHandle::noop(),
            CacheConfig::default(),
        );
        (cached, store, cache)
    }

    fn alice() -> NewUser {
        NewUser {
            name: "A".to_string(),
            email: "a@x.com".to_string(),
            age: 30,
            status: UserStatus::Active,
        }
    }

    #[tokio::test]
    async fn test_miss_reads_store_then_populates() {
        let (cached, store, cache) = fixture();
        let ctx = RequestContext::background();
        let created = store.create(&ctx, alice()).await.unwrap();

        let user = cached.get(&ctx, created.id).await.unwrap();
        assert_eq!(user, created);
        assert!(cached.drain(Duration::from_secs(1)).await);

        let bytes = cache.peek(&CacheKey::user(created.id)).unwrap();
        assert_eq!(codec::decode(&bytes).unwrap(), created);
        assert_eq!(cache.ttl(&CacheKey::user(created.id)).map(|t| t <= DEFAULT_TTL), Some(true));

        let stats = cached.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.populations, 1);

        // Second read is a hit.
        assert_eq!(cached.get(&ctx, created.id).await.unwrap(), created);
        assert_eq!(cached.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_not_found_does_not_populate() {
        let (cached, _store, cache) = fixture();
        let ctx = RequestContext::background();
        let id = UserId::new(404);

        assert_eq!(cached.get(&ctx, id).await, Err(TesselError::NotFound { id }));
        assert!(cached.drain(Duration::from_secs(1)).await);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_cached_id_is_a_miss() {
        let (cached, store, cache) = fixture();
        let ctx = RequestContext::background();
        let created = store.create(&ctx, alice()).await.unwrap();

        let mut impostor = created.clone();
        impostor.id = UserId::new(99);
        impostor.name = "Z".to_string();
        cache
            .insert_raw(
                &CacheKey::user(created.id),
                codec::encode(&impostor).unwrap(),
                DEFAULT_TTL,
            )
            .unwrap();

        assert_eq!(cached.get(&ctx, created.id).await.unwrap(), created);
        assert_eq!(cached.stats().corrupt, 1);
    }

    #[tokio::test]
    async fn test_write_validation_happens_before_store() {
        let (cached, store, _cache) = fixture();
        let ctx = RequestContext::background();
        let mut bad = alice();
        bad.email = String::new();
        assert!(matches!(
            cached.create(&ctx, bad).await,
            Err(TesselError::Validation(_))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_soft_delete_invalidates() {
        let (cached, store, cache) = fixture();
        let ctx = RequestContext::background();
        let created = store.create(&ctx, alice()).await.unwrap();
        cached.get(&ctx, created.id).await.unwrap();
        assert!(cached.drain(Duration::from_secs(1)).await);

        cached.soft_delete(&ctx, created.id).await.unwrap();
        assert!(cache.peek(&CacheKey::user(created.id)).is_none());
        assert_eq!(
            cached.get(&ctx, created.id).await,
            Err(TesselError::NotFound { id: created.id })
        );
        assert_eq!(cached.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_drain_with_nothing_in_flight() {
        let (cached, _store, _cache) = fixture();
        assert_eq!(cached.populations_in_flight(), 0);
        assert!(cached.drain(Duration::from_millis(1)).await);
    }
}
