//! Identity types for Tessel entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Prefix shared by every user cache key.
pub const USER_KEY_PREFIX: &str = "user:";

/// Identifier of a user row, assigned by the backing store.
///
/// Ids start at 1; zero is never a valid identifier and is used by the codec
/// to reject payloads that lost their id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    /// Wrap a raw identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric identifier.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The id as a span attribute value, saturating at `i64::MAX`.
    pub fn span_value(self) -> i64 {
        i64::try_from(self.0).unwrap_or(i64::MAX)
    }

    /// Returns true if this id could have been assigned by a store.
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl From<u64> for UserId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self)
    }
}

/// A cache key for a single user.
///
/// Keys are derived from the id alone (`user:<id>`), so the same id always
/// lands on the same key and no two users share one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a user id.
    pub fn user(id: UserId) -> Self {
        Self(format!("{USER_KEY_PREFIX}{id}"))
    }

    /// The key as it is sent to the cache.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_user_key_format() {
        assert_eq!(CacheKey::user(UserId::new(1)).as_str(), "user:1");
        assert_eq!(CacheKey::user(UserId::new(42)).to_string(), "user:42");
    }

    #[test]
    fn test_span_value_saturates_above_i64_max() {
        assert_eq!(UserId::new(7).span_value(), 7);
        assert_eq!(UserId::new(i64::MAX as u64).span_value(), i64::MAX);
        assert_eq!(UserId::new(u64::MAX).span_value(), i64::MAX);
    }

    #[test]
    fn test_zero_id_is_invalid() {
        assert!(!UserId::new(0).is_valid());
        assert!(UserId::new(1).is_valid());
    }

    proptest! {
        #[test]
        fn prop_key_derivation_is_injective(a in 1u64.., b in 1u64..) {
            let ka = CacheKey::user(UserId::new(a));
            let kb = CacheKey::user(UserId::new(b));
            prop_assert_eq!(a == b, ka == kb);
        }

        #[test]
        fn prop_key_carries_prefix_and_id(raw in 1u64..) {
            let key = CacheKey::user(UserId::new(raw));
            let raw_str = raw.to_string();
            prop_assert_eq!(key.as_str().strip_prefix(USER_KEY_PREFIX), Some(raw_str.as_str()));
        }
    }
}
