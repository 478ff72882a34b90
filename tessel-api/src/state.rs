//! Shared application state for Axum routers.
//!
//! `ServiceContext` is built once at startup and owns everything with a
//! lifecycle: the backends, the user service and the tracer provider.
//! Handlers only see the cheap-to-clone `AppState`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tessel_core::TracerHandle;
use tessel_storage::{CacheBackend, CachedUserStore, InMemoryCacheBackend, InMemoryUserStore, UserStore};

use crate::config::{AppConfig, CacheBackendKind, StoreBackend};
use crate::db::PgUserStore;
use crate::downstream::DownstreamClient;
use crate::error::ApiResult;
use crate::redis_cache::RedisCacheBackend;
use crate::services::UserService;
use crate::telemetry::{shutdown_tracer, Telemetry};

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub users: UserService,
    /// Tracer for server spans. Disabled tracing yields a no-op handle.
    pub tracer: TracerHandle,
    /// Deadline given to every request context.
    pub request_timeout: Duration,
    pub service_name: String,
    pub start_time: Instant,
}

crate::impl_from_ref!(UserService, users);
crate::impl_from_ref!(TracerHandle, tracer);

/// Owner of the service's long-lived resources.
pub struct ServiceContext {
    config: AppConfig,
    telemetry: Telemetry,
    state: AppState,
}

impl ServiceContext {
    /// Connect the configured backends and wire the user service.
    ///
    /// The users table is created first when `database.auto_migrate` is set.
    pub async fn connect(config: AppConfig, telemetry: Telemetry) -> ApiResult<Self> {
        let store: Arc<dyn UserStore> = match config.database.backend {
            StoreBackend::Postgres => {
                let store = PgUserStore::from_config(&config.database)?;
                if config.database.auto_migrate {
                    store.migrate().await?;
                }
                Arc::new(store)
            }
            StoreBackend::Memory => Arc::new(InMemoryUserStore::new()),
        };

        let cache: Arc<dyn CacheBackend> = match config.cache.backend {
            CacheBackendKind::Redis => Arc::new(RedisCacheBackend::from_config(&config.redis)?),
            CacheBackendKind::Memory => Arc::new(InMemoryCacheBackend::new()),
        };

        tracing::info!(
            store = ?config.database.backend,
            cache = ?config.cache.backend,
            downstream = ?config.downstream.base_url,
            "Backends connected"
        );

        Self::assemble(config, telemetry, store, cache)
    }

    /// Wire the service over already-built backends.
    pub fn assemble(
        config: AppConfig,
        telemetry: Telemetry,
        store: Arc<dyn UserStore>,
        cache: Arc<dyn CacheBackend>,
    ) -> ApiResult<Self> {
        let tracer = telemetry.tracer();
        let cached = CachedUserStore::new(store, cache, tracer.clone(), config.cache.cache_config());
        let downstream = DownstreamClient::from_config(&config.downstream, tracer.clone())?;
        let users = UserService::new(cached, downstream, tracer.clone());

        let state = AppState {
            users,
            tracer,
            request_timeout: config.app.request_timeout(),
            service_name: config.app.name.clone(),
            start_time: Instant::now(),
        };

        Ok(Self {
            config,
            telemetry,
            state,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Wait for cache populations, then flush and stop the tracer.
    pub async fn shutdown(self) {
        let drain_timeout = self.config.cache.drain_timeout();
        let cached = self.state.users.cached();
        if cached.drain(drain_timeout).await {
            tracing::info!("Cache populations drained");
        } else {
            tracing::warn!(
                in_flight = cached.populations_in_flight(),
                timeout_ms = drain_timeout.as_millis() as u64,
                "Cache populations still running at shutdown"
            );
        }

        if let Some(provider) = self.telemetry.provider().cloned() {
            // Flushing blocks on the exporter thread.
            if let Err(e) = tokio::task::spawn_blocking(move || shutdown_tracer(&provider)).await {
                tracing::warn!(error = %e, "Tracer shutdown task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheSettings, ServerConfig};
    use crate::db::DbConfig;
    use tessel_core::RequestContext;
    use tessel_test_utils::fixtures::user_a;

    fn memory_config() -> AppConfig {
        AppConfig {
            app: ServerConfig {
                request_timeout_secs: 3,
                ..Default::default()
            },
            database: DbConfig {
                backend: StoreBackend::Memory,
                ..Default::default()
            },
            cache: CacheSettings {
                backend: CacheBackendKind::Memory,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_connect_with_memory_backends() -> Result<(), String> {
        let service = ServiceContext::connect(memory_config(), Telemetry::disabled())
            .await
            .map_err(|e| e.message)?;
        let state = service.state();
        assert_eq!(state.request_timeout, Duration::from_secs(3));
        assert_eq!(state.service_name, "tessel-api");
        assert!(!state.tracer.is_enabled());
        assert!(!state.users.has_downstream());
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_population() -> Result<(), String> {
        let store = Arc::new(InMemoryUserStore::new());
        store.seed(user_a()).map_err(|e| e.to_string())?;
        let cache = Arc::new(InMemoryCacheBackend::new());
        let service = ServiceContext::assemble(memory_config(), Telemetry::disabled(), store, cache.clone())
            .map_err(|e| e.message)?;

        let state = service.state();
        state
            .users
            .get(&RequestContext::background(), user_a().id)
            .await
            .map_err(|e| e.to_string())?;

        service.shutdown().await;
        assert_eq!(state.users.cached().populations_in_flight(), 0);
        assert!(cache.peek(&tessel_core::CacheKey::user(user_a().id)).is_some());
        Ok(())
    }
}
