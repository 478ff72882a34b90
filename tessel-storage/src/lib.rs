//! Tessel Storage - Store and Cache Abstractions
//!
//! Defines the user store and cache backend traits, their in-memory
//! implementations and the read-through `CachedUserStore`. The Postgres and
//! Redis implementations live in tessel-api.

pub mod cache;
pub mod store;

pub use cache::{
    CacheBackend, CacheConfig, CacheStats, CachedUserStore, InMemoryCacheBackend, DEFAULT_TTL,
};
pub use store::{InMemoryUserStore, UserStore, EMAIL_UNIQUE_CONSTRAINT};
