//! Tessel Core - Types, Request Context and Instrumentation
//!
//! Shared by every other crate: the user entity and its identifiers, the
//! error taxonomy, the cache codec, the request context used for deadline
//! and cancellation propagation, and the call-instrumentation wrapper.

pub mod codec;
mod context;
mod entities;
mod error;
mod health;
mod identity;
mod instrument;

pub use context::{CancelHandle, RequestContext};
pub use entities::{NewUser, User, UserStatus, UserUpdate};
pub use error::{
    CacheError, CacheResult, CodecError, Interrupted, StorageError, TesselError, TesselResult,
    ValidationError,
};
pub use health::{HealthCheck, HealthStatus};
pub use identity::{CacheKey, Timestamp, UserId, USER_KEY_PREFIX};
pub use instrument::{TracedOperation, TracerHandle};
