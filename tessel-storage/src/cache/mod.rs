//! Cache layer: backend trait, in-memory backend and the read-through store.
//!
//! The read-through layer treats the cache as an optimization only. Every
//! cache failure degrades to a store read, and every write removes the
//! affected key before it is acknowledged.

pub mod memory;
pub mod read_through;
pub mod traits;

pub use memory::InMemoryCacheBackend;
pub use read_through::{CacheConfig, CachedUserStore, DEFAULT_TTL};
pub use traits::{CacheBackend, CacheStats};
