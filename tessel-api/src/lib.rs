//! Tessel API - HTTP Service Layer
//!
//! Serves user records over a JSON API. Reads go through the read-through
//! cache in `tessel-storage`; writes invalidate it. Every request gets a
//! `RequestContext` carrying its deadline, cancellation and server span.

#[macro_use]
mod macros;

pub mod config;
pub mod db;
pub mod downstream;
pub mod error;
pub mod extractors;
pub mod redis_cache;
pub mod routes;
pub mod services;
pub mod state;
pub mod telemetry;
pub mod types;

pub use config::AppConfig;
pub use db::{DbConfig, PgUserStore};
pub use downstream::{DownstreamClient, DownstreamConfig, DownstreamError};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use redis_cache::{RedisCacheBackend, RedisConfig};
pub use routes::create_api_router;
pub use services::UserService;
pub use state::{AppState, ServiceContext};
pub use types::*;
