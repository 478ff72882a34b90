//! Error types for Tessel operations
//!
//! `TesselError` is the only error that crosses the service boundary.
//! `CacheError` and `CodecError` stay inside the read-through path: neither
//! converts into `TesselError`, so a cache failure can only reach a caller
//! through an explicit mapping.

use crate::UserId;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Insert failed: {reason}")]
    InsertFailed { reason: String },

    #[error("Update failed for user {id}: {reason}")]
    UpdateFailed { id: UserId, reason: String },

    #[error("Query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("Connection unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },
}

/// Cache backend errors.
///
/// Absorbed by the read path (treated as a miss) and by invalidation
/// (logged and counted).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache operation timed out")]
    Timeout,

    #[error("Cache operation cancelled")]
    Cancelled,
}

/// Errors decoding a cached user representation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Empty payload")]
    Empty,

    #[error("Malformed payload: {reason}")]
    Malformed { reason: String },

    #[error("Payload does not describe a live user: {reason}")]
    Invalid { reason: String },
}

/// Why a guarded future did not run to completion.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum Interrupted {
    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("cancelled")]
    Cancelled,
}

impl Interrupted {
    /// Attach the name of the interrupted operation.
    pub fn during(self, operation: impl Into<String>) -> TesselError {
        let operation = operation.into();
        match self {
            Interrupted::DeadlineExceeded => TesselError::Timeout { operation },
            Interrupted::Cancelled => TesselError::Cancelled { operation },
        }
    }
}

impl From<Interrupted> for CacheError {
    fn from(err: Interrupted) -> Self {
        match err {
            Interrupted::DeadlineExceeded => CacheError::Timeout,
            Interrupted::Cancelled => CacheError::Cancelled,
        }
    }
}

impl From<Interrupted> for TesselError {
    fn from(err: Interrupted) -> Self {
        err.during("request")
    }
}

/// Master error type for all Tessel errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TesselError {
    #[error("User not found: {id}")]
    NotFound { id: UserId },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Timed out during {operation}")]
    Timeout { operation: String },

    #[error("Cancelled during {operation}")]
    Cancelled { operation: String },
}

impl TesselError {
    /// Returns true for errors caused by the caller's context rather than
    /// by a collaborator.
    pub fn is_interruption(&self) -> bool {
        matches!(self, TesselError::Timeout { .. } | TesselError::Cancelled { .. })
    }
}

/// Result type alias for Tessel operations.
pub type TesselResult<T> = Result<T, TesselError>;

/// Result type alias for cache backend operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = TesselError::NotFound { id: UserId::new(9) };
        assert_eq!(err.to_string(), "User not found: 9");
    }

    #[test]
    fn test_validation_error_wraps() {
        let err: TesselError = ValidationError::RequiredFieldMissing {
            field: "email".to_string(),
        }
        .into();
        let msg = err.to_string();
        assert!(msg.contains("Validation error"));
        assert!(msg.contains("email"));
    }

    #[test]
    fn test_interrupted_maps_to_named_operation() {
        let err = Interrupted::DeadlineExceeded.during("store.find_by_id");
        assert_eq!(
            err,
            TesselError::Timeout {
                operation: "store.find_by_id".to_string()
            }
        );
        assert!(err.is_interruption());

        let err = Interrupted::Cancelled.during("store.update");
        assert!(matches!(err, TesselError::Cancelled { .. }));
    }

    #[test]
    fn test_interrupted_into_cache_error() {
        assert_eq!(CacheError::from(Interrupted::DeadlineExceeded), CacheError::Timeout);
        assert_eq!(CacheError::from(Interrupted::Cancelled), CacheError::Cancelled);
    }

    #[test]
    fn test_storage_error_is_not_interruption() {
        let err: TesselError = StorageError::LockPoisoned.into();
        assert!(!err.is_interruption());
    }
}
