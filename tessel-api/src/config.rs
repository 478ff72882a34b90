//! API Configuration Module
//!
//! Configuration is read from an optional YAML file and then overridden by
//! environment variables, with development defaults for everything.
//!
//! File lookup: `TESSEL_CONFIG` if set, otherwise `conf.yaml` in the working
//! directory when it exists.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tessel_storage::CacheConfig;

use crate::db::DbConfig;
use crate::downstream::DownstreamConfig;
use crate::error::{ApiError, ApiResult};
use crate::redis_cache::RedisConfig;
use crate::telemetry::TelemetryConfig;

/// Default file read when `TESSEL_CONFIG` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "conf.yaml";

// ============================================================================
// SECTIONS
// ============================================================================

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    /// production, staging or development
    pub environment: String,
    /// Deadline applied to every request context.
    pub request_timeout_secs: u64,
    /// Allowed CORS origins. Empty allows all origins.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "tessel-api".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            environment: "development".to_string(),
            request_timeout_secs: 10,
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn bind_addr(&self) -> ApiResult<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse::<SocketAddr>().map_err(|e| {
            ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e))
        })
    }
}

/// Which user store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            _ => Err(format!("Unknown store backend: {value}")),
        }
    }
}

/// Which cache backend shadows the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Redis,
    Memory,
}

impl FromStr for CacheBackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            _ => Err(format!("Unknown cache backend: {value}")),
        }
    }
}

/// Read-through cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    pub ttl_secs: u64,
    pub population_timeout_ms: u64,
    pub invalidation_timeout_ms: u64,
    /// How long shutdown waits for in-flight populations.
    pub drain_timeout_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let cache = CacheConfig::default();
        Self {
            backend: CacheBackendKind::default(),
            ttl_secs: cache.ttl.as_secs(),
            population_timeout_ms: cache.population_timeout.as_millis() as u64,
            invalidation_timeout_ms: cache.invalidation_timeout.as_millis() as u64,
            drain_timeout_ms: 5_000,
        }
    }
}

impl CacheSettings {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .with_ttl(Duration::from_secs(self.ttl_secs))
            .with_population_timeout(Duration::from_millis(self.population_timeout_ms))
            .with_invalidation_timeout(Duration::from_millis(self.invalidation_timeout_ms))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

// ============================================================================
// APP CONFIGURATION
// ============================================================================

/// Complete service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: ServerConfig,
    pub database: DbConfig,
    pub redis: RedisConfig,
    pub cache: CacheSettings,
    pub tracing: TelemetryConfig,
    pub downstream: DownstreamConfig,
}

impl AppConfig {
    /// Load from the config file (if any) and apply environment overrides.
    pub fn load() -> ApiResult<Self> {
        let mut config = match config_path() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse a YAML config file. Missing sections and fields take defaults.
    pub fn from_file(path: &Path) -> ApiResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ApiError::invalid_input(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> ApiResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
            .map_err(|e| ApiError::invalid_input(format!("Invalid configuration: {}", e)))
    }

    /// Override fields from `TESSEL_*` environment variables.
    ///
    /// Environment variables:
    /// - `TESSEL_HOST`, `TESSEL_PORT` (or `PORT`), `TESSEL_ENVIRONMENT`
    /// - `TESSEL_REQUEST_TIMEOUT_SECS`, `TESSEL_CORS_ORIGINS` (comma-separated)
    /// - `TESSEL_STORE_BACKEND` (postgres|memory)
    /// - `TESSEL_DB_HOST`, `TESSEL_DB_PORT`, `TESSEL_DB_NAME`, `TESSEL_DB_USER`,
    ///   `TESSEL_DB_PASSWORD`, `TESSEL_DB_POOL_SIZE`, `TESSEL_DB_TIMEOUT`
    /// - `TESSEL_REDIS_ADDR`, `TESSEL_REDIS_PASSWORD`, `TESSEL_REDIS_DB`,
    ///   `TESSEL_REDIS_POOL_SIZE`
    /// - `TESSEL_CACHE_BACKEND` (redis|memory), `TESSEL_CACHE_TTL_SECS`,
    ///   `TESSEL_CACHE_POPULATION_TIMEOUT_MS`, `TESSEL_CACHE_INVALIDATION_TIMEOUT_MS`,
    ///   `TESSEL_CACHE_DRAIN_TIMEOUT_MS`
    /// - `TESSEL_TRACING_ENABLED`, `TESSEL_OTLP_ENDPOINT`, `TESSEL_SERVICE_NAME`,
    ///   `TESSEL_TRACE_SAMPLE_RATE`
    /// - `TESSEL_DOWNSTREAM_URL`, `TESSEL_DOWNSTREAM_TIMEOUT_SECS`
    pub fn apply_env(&mut self) {
        let app = &mut self.app;
        override_with(&mut app.host, "TESSEL_HOST");
        if let Some(port) = env_parse("PORT").or_else(|| env_parse("TESSEL_PORT")) {
            app.port = port;
        }
        override_with(&mut app.environment, "TESSEL_ENVIRONMENT");
        override_with(&mut app.request_timeout_secs, "TESSEL_REQUEST_TIMEOUT_SECS");
        if let Ok(origins) = std::env::var("TESSEL_CORS_ORIGINS") {
            app.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }

        let db = &mut self.database;
        override_with(&mut db.backend, "TESSEL_STORE_BACKEND");
        override_with(&mut db.host, "TESSEL_DB_HOST");
        override_with(&mut db.port, "TESSEL_DB_PORT");
        override_with(&mut db.dbname, "TESSEL_DB_NAME");
        override_with(&mut db.user, "TESSEL_DB_USER");
        override_with(&mut db.password, "TESSEL_DB_PASSWORD");
        override_with(&mut db.max_size, "TESSEL_DB_POOL_SIZE");
        override_with(&mut db.timeout_secs, "TESSEL_DB_TIMEOUT");

        let redis = &mut self.redis;
        override_with(&mut redis.addr, "TESSEL_REDIS_ADDR");
        if let Ok(password) = std::env::var("TESSEL_REDIS_PASSWORD") {
            redis.password = Some(password).filter(|p| !p.is_empty());
        }
        override_with(&mut redis.db, "TESSEL_REDIS_DB");
        override_with(&mut redis.pool_size, "TESSEL_REDIS_POOL_SIZE");

        let cache = &mut self.cache;
        override_with(&mut cache.backend, "TESSEL_CACHE_BACKEND");
        override_with(&mut cache.ttl_secs, "TESSEL_CACHE_TTL_SECS");
        override_with(&mut cache.population_timeout_ms, "TESSEL_CACHE_POPULATION_TIMEOUT_MS");
        override_with(&mut cache.invalidation_timeout_ms, "TESSEL_CACHE_INVALIDATION_TIMEOUT_MS");
        override_with(&mut cache.drain_timeout_ms, "TESSEL_CACHE_DRAIN_TIMEOUT_MS");

        let tracing = &mut self.tracing;
        if let Ok(enabled) = std::env::var("TESSEL_TRACING_ENABLED") {
            tracing.enabled = matches!(enabled.to_lowercase().as_str(), "true" | "1");
        }
        if let Ok(endpoint) = std::env::var("TESSEL_OTLP_ENDPOINT") {
            tracing.otlp_endpoint = Some(endpoint).filter(|e| !e.is_empty());
        }
        override_with(&mut tracing.service_name, "TESSEL_SERVICE_NAME");
        override_with(&mut tracing.sample_rate, "TESSEL_TRACE_SAMPLE_RATE");
        tracing.environment = self.app.environment.clone();

        if let Ok(url) = std::env::var("TESSEL_DOWNSTREAM_URL") {
            self.downstream.base_url = Some(url).filter(|u| !u.is_empty());
        }
        override_with(&mut self.downstream.timeout_secs, "TESSEL_DOWNSTREAM_TIMEOUT_SECS");
    }
}

fn config_path() -> Option<PathBuf> {
    match std::env::var("TESSEL_CONFIG") {
        Ok(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.exists().then_some(default)
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Replace `field` when `key` is set and parses. Unparseable values are
/// ignored with a warning.
fn override_with<T: FromStr>(field: &mut T, key: &str) {
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *field = value,
        Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable environment override"),
    }
}
