//! Tessel Test Utilities
//!
//! Centralized test infrastructure for the Tessel workspace:
//! - Proptest generators for users and write payloads
//! - Fixtures wiring in-memory stores behind the read-through cache
//! - Fault-injecting cache and store wrappers
//! - Span capture backed by the OpenTelemetry in-memory exporter
//! - Custom assertions for Tessel-specific validation

pub use tessel_core::{
    codec, CacheError, CacheKey, CacheResult, HealthCheck, NewUser, RequestContext, TesselError,
    TesselResult, Timestamp, TracerHandle, User, UserId, UserStatus, UserUpdate,
};
pub use tessel_storage::{
    CacheBackend, CacheConfig, CachedUserStore, InMemoryCacheBackend, InMemoryUserStore,
    UserStore,
};

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating Tessel entity types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a valid (non-zero) UserId.
    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        (1u64..=i64::MAX as u64).prop_map(UserId::new)
    }

    /// Generate a Timestamp with sub-second precision.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // 2020-01-01 .. 2030-01-01
        (1577836800i64..1893456000i64, 0u32..1_000_000_000).prop_map(|(secs, nanos)| {
            chrono::DateTime::from_timestamp(secs, nanos).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_user_status() -> impl Strategy<Value = UserStatus> {
        prop_oneof![Just(UserStatus::Active), Just(UserStatus::Disabled)]
    }

    pub fn arb_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z '\\-]{0,39}"
    }

    pub fn arb_email() -> impl Strategy<Value = String> {
        "[a-z0-9._]{1,20}@[a-z0-9]{1,12}\\.(com|org|net|io)"
    }

    /// Generate a live user, as the store would hand it out.
    pub fn arb_user() -> impl Strategy<Value = User> {
        (
            arb_user_id(),
            arb_name(),
            arb_email(),
            0i32..130,
            arb_user_status(),
            arb_timestamp(),
            arb_timestamp(),
        )
            .prop_map(|(id, name, email, age, status, a, b)| {
                let (created_at, updated_at) = if a <= b { (a, b) } else { (b, a) };
                User {
                    id,
                    name,
                    email,
                    age,
                    status,
                    created_at,
                    updated_at,
                    deleted_at: None,
                }
            })
    }

    pub fn arb_new_user() -> impl Strategy<Value = NewUser> {
        (arb_name(), arb_email(), 0i32..130, arb_user_status()).prop_map(
            |(name, email, age, status)| NewUser {
                name,
                email,
                age,
                status,
            },
        )
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// The canonical `{id:1, name:"A", email:"a@x.com"}` user.
    pub fn user_a() -> User {
        let now = Utc::now();
        User {
            id: UserId::new(1),
            name: "A".to_string(),
            email: "a@x.com".to_string(),
            age: 30,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn new_user(name: &str, email: &str) -> NewUser {
        NewUser {
            name: name.to_string(),
            email: email.to_string(),
            age: 30,
            status: UserStatus::Active,
        }
    }

    pub fn update_of(user: &User, name: &str) -> UserUpdate {
        UserUpdate {
            id: user.id,
            name: name.to_string(),
            email: user.email.clone(),
            age: user.age,
            status: user.status,
        }
    }

    /// Config with short timeouts so failure paths finish quickly.
    pub fn fast_config() -> CacheConfig {
        CacheConfig::default()
            .with_population_timeout(Duration::from_millis(500))
            .with_invalidation_timeout(Duration::from_millis(200))
    }

    /// A read-through store over in-memory backends.
    pub struct Harness {
        pub store: Arc<InMemoryUserStore>,
        pub cache: Arc<InMemoryCacheBackend>,
        pub cached: CachedUserStore,
    }

    impl Harness {
        pub fn new(tracer: TracerHandle) -> Self {
            Self::with_config(tracer, CacheConfig::default())
        }

        pub fn with_config(tracer: TracerHandle, config: CacheConfig) -> Self {
            let store = Arc::new(InMemoryUserStore::new());
            let cache = Arc::new(InMemoryCacheBackend::new());
            let cached = CachedUserStore::new(store.clone(), cache.clone(), tracer, config);
            Self {
                store,
                cache,
                cached,
            }
        }

        /// Seed the store with `user` and return it.
        pub fn seed(&self, user: User) -> User {
            if let Err(e) = self.store.seed(user.clone()) {
                panic!("seeding store failed: {e}");
            }
            user
        }

        pub fn cached_bytes(&self, id: UserId) -> Option<Vec<u8>> {
            self.cache.peek(&CacheKey::user(id))
        }
    }
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

pub mod faults {
    //! Cache and store wrappers that add latency or failures.

    use super::*;

    /// Per-operation fault switches for `FaultyCache`.
    #[derive(Debug, Default)]
    pub struct CacheFaults {
        pub fail_get: AtomicBool,
        pub fail_set: AtomicBool,
        pub fail_delete: AtomicBool,
    }

    /// Cache wrapper with configurable delays and failures.
    pub struct FaultyCache {
        inner: Arc<dyn CacheBackend>,
        get_delay: Duration,
        set_delay: Duration,
        delete_delay: Duration,
        pub faults: CacheFaults,
        sets: AtomicUsize,
        deletes: AtomicUsize,
    }

    impl FaultyCache {
        pub fn new(inner: Arc<dyn CacheBackend>) -> Self {
            Self {
                inner,
                get_delay: Duration::ZERO,
                set_delay: Duration::ZERO,
                delete_delay: Duration::ZERO,
                faults: CacheFaults::default(),
                sets: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
            }
        }

        /// Every operation fails with `Unavailable`.
        pub fn unavailable(inner: Arc<dyn CacheBackend>) -> Self {
            let cache = Self::new(inner);
            cache.faults.fail_get.store(true, Ordering::SeqCst);
            cache.faults.fail_set.store(true, Ordering::SeqCst);
            cache.faults.fail_delete.store(true, Ordering::SeqCst);
            cache
        }

        pub fn with_get_delay(mut self, delay: Duration) -> Self {
            self.get_delay = delay;
            self
        }

        pub fn with_set_delay(mut self, delay: Duration) -> Self {
            self.set_delay = delay;
            self
        }

        pub fn with_delete_delay(mut self, delay: Duration) -> Self {
            self.delete_delay = delay;
            self
        }

        /// Number of `set` calls that reached the wrapper.
        pub fn set_calls(&self) -> usize {
            self.sets.load(Ordering::SeqCst)
        }

        pub fn delete_calls(&self) -> usize {
            self.deletes.load(Ordering::SeqCst)
        }

        fn unavailable_error(op: &str) -> CacheError {
            CacheError::Unavailable {
                reason: format!("injected {op} failure"),
            }
        }
    }

    #[async_trait]
    impl CacheBackend for FaultyCache {
        async fn get(&self, ctx: &RequestContext, key: &CacheKey) -> CacheResult<Option<Vec<u8>>> {
            if !self.get_delay.is_zero() {
                tokio::time::sleep(self.get_delay).await;
            }
            if self.faults.fail_get.load(Ordering::SeqCst) {
                return Err(Self::unavailable_error("get"));
            }
            self.inner.get(ctx, key).await
        }

        async fn set(
            &self,
            ctx: &RequestContext,
            key: &CacheKey,
            value: Vec<u8>,
            ttl: Duration,
        ) -> CacheResult<()> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            if !self.set_delay.is_zero() {
                tokio::time::sleep(self.set_delay).await;
            }
            if self.faults.fail_set.load(Ordering::SeqCst) {
                return Err(Self::unavailable_error("set"));
            }
            self.inner.set(ctx, key, value, ttl).await
        }

        async fn delete(&self, ctx: &RequestContext, key: &CacheKey) -> CacheResult<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            if !self.delete_delay.is_zero() {
                tokio::time::sleep(self.delete_delay).await;
            }
            if self.faults.fail_delete.load(Ordering::SeqCst) {
                return Err(Self::unavailable_error("delete"));
            }
            self.inner.delete(ctx, key).await
        }

        async fn ping(&self) -> HealthCheck {
            if self.faults.fail_get.load(Ordering::SeqCst) {
                return HealthCheck::unhealthy("cache", "injected failure");
            }
            self.inner.ping().await
        }
    }

    /// Store wrapper that delays every call.
    pub struct SlowStore {
        inner: Arc<dyn UserStore>,
        delay: Duration,
    }

    impl SlowStore {
        pub fn new(inner: Arc<dyn UserStore>, delay: Duration) -> Self {
            Self { inner, delay }
        }
    }

    #[async_trait]
    impl UserStore for SlowStore {
        async fn find_by_id(&self, ctx: &RequestContext, id: UserId) -> TesselResult<User> {
            tokio::time::sleep(self.delay).await;
            self.inner.find_by_id(ctx, id).await
        }

        async fn create(&self, ctx: &RequestContext, new: NewUser) -> TesselResult<User> {
            tokio::time::sleep(self.delay).await;
            self.inner.create(ctx, new).await
        }

        async fn update(&self, ctx: &RequestContext, update: UserUpdate) -> TesselResult<User> {
            tokio::time::sleep(self.delay).await;
            self.inner.update(ctx, update).await
        }

        async fn soft_delete(&self, ctx: &RequestContext, id: UserId) -> TesselResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.soft_delete(ctx, id).await
        }

        async fn list(&self, ctx: &RequestContext) -> TesselResult<Vec<User>> {
            tokio::time::sleep(self.delay).await;
            self.inner.list(ctx).await
        }

        async fn ping(&self) -> HealthCheck {
            self.inner.ping().await
        }
    }
}

// ============================================================================
// SPAN CAPTURE
// ============================================================================

pub mod spans {
    //! Collect finished spans in memory.

    use super::*;
    use opentelemetry::trace::TracerProvider;
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};

    /// Tracer provider exporting synchronously into memory.
    pub struct SpanCapture {
        exporter: InMemorySpanExporter,
        provider: SdkTracerProvider,
    }

    impl Default for SpanCapture {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SpanCapture {
        pub fn new() -> Self {
            let exporter = InMemorySpanExporter::default();
            let provider = SdkTracerProvider::builder()
                .with_simple_exporter(exporter.clone())
                .build();
            Self { exporter, provider }
        }

        pub fn tracer(&self) -> TracerHandle {
            TracerHandle::new(self.provider.tracer("tessel-test"))
        }

        pub fn provider(&self) -> &SdkTracerProvider {
            &self.provider
        }

        pub fn finished(&self) -> Vec<SpanData> {
            self.exporter.get_finished_spans().unwrap_or_default()
        }

        pub fn named(&self, name: &str) -> Vec<SpanData> {
            self.finished()
                .into_iter()
                .filter(|span| span.name == name)
                .collect()
        }

        pub fn reset(&self) {
            self.exporter.reset();
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for Tessel-specific validation.

    use super::*;

    /// Assert that a TesselResult is a NotFound error for `id`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &TesselResult<T>, id: UserId) {
        match result {
            Err(TesselError::NotFound { id: got }) => {
                assert_eq!(*got, id, "Wrong id in NotFound error");
            }
            other => panic!("Expected NotFound for {id}, got: {other:?}"),
        }
    }

    /// Assert that a TesselResult is a Validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &TesselResult<T>) {
        match result {
            Err(TesselError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {other:?}"),
        }
    }

    /// Assert that a TesselResult is a Timeout error.
    #[track_caller]
    pub fn assert_timeout<T: std::fmt::Debug>(result: &TesselResult<T>) {
        match result {
            Err(TesselError::Timeout { .. }) => {}
            other => panic!("Expected Timeout error, got: {other:?}"),
        }
    }

    /// Assert that `bytes` decode to exactly `user`.
    #[track_caller]
    pub fn assert_cached_as(bytes: Option<Vec<u8>>, user: &User) {
        let bytes = bytes.unwrap_or_else(|| panic!("Expected user {} in cache", user.id));
        match codec::decode(&bytes) {
            Ok(cached) => assert_eq!(&cached, user, "Cached user differs"),
            Err(e) => panic!("Cached bytes for {} do not decode: {e}", user.id),
        }
    }
}
