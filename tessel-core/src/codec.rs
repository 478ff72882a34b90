//! Cached representation of a user
//!
//! JSON via serde_json. Every decode failure is reported as a `CodecError`,
//! which the read path treats exactly like a cache miss.

use crate::{CodecError, User};

/// Serialize a user for the cache.
pub fn encode(user: &User) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(user).map_err(|e| CodecError::Malformed {
        reason: e.to_string(),
    })
}

/// Deserialize a cached user.
///
/// Rejects payloads that could not have been produced by `encode` for a
/// live row: empty bytes, malformed JSON, a zero id and soft-deleted users.
pub fn decode(bytes: &[u8]) -> Result<User, CodecError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(CodecError::Empty);
    }

    let user: User = serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed {
        reason: e.to_string(),
    })?;

    if !user.id.is_valid() {
        return Err(CodecError::Invalid {
            reason: "id is zero".to_string(),
        });
    }
    if user.is_deleted() {
        return Err(CodecError::Invalid {
            reason: format!("user {} is soft-deleted", user.id),
        });
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{UserId, UserStatus};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn sample() -> User {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        User {
            id: UserId::new(1),
            name: "A".to_string(),
            email: "a@x.com".to_string(),
            age: 30,
            status: UserStatus::Active,
            created_at: at,
            updated_at: at,
            deleted_at: None,
        }
    }

    #[test]
    fn test_decode_rejects_empty() {
        assert_eq!(decode(b""), Err(CodecError::Empty));
        assert_eq!(decode(b"  \n"), Err(CodecError::Empty));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(decode(b"{\"id\":"), Err(CodecError::Malformed { .. })));
        assert!(matches!(decode(b"not json"), Err(CodecError::Malformed { .. })));
        assert!(matches!(decode(&[0xff, 0xfe, 0x00]), Err(CodecError::Malformed { .. })));
    }

    #[test]
    fn test_decode_rejects_zero_id() {
        let mut user = sample();
        user.id = UserId::new(0);
        let bytes = serde_json::to_vec(&user).unwrap();
        assert!(matches!(decode(&bytes), Err(CodecError::Invalid { .. })));
    }

    #[test]
    fn test_decode_rejects_soft_deleted() {
        let mut user = sample();
        user.deleted_at = Some(user.updated_at);
        let bytes = serde_json::to_vec(&user).unwrap();
        assert!(matches!(decode(&bytes), Err(CodecError::Invalid { .. })));
    }

    #[test]
    fn test_encoded_status_is_integer() {
        let bytes = encode(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["status"], 1);
        assert_eq!(value["id"], 1);
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            id in 1u64..,
            name in "[a-zA-Z ]{1,24}",
            email in "[a-z]{1,12}@[a-z]{1,8}\\.com",
            age in 0i32..150,
            active in any::<bool>(),
            secs in 0i64..4_000_000_000,
            nanos in 0u32..1_000_000_000,
        ) {
            let at = Utc.timestamp_opt(secs, nanos).unwrap();
            let user = User {
                id: UserId::new(id),
                name,
                email,
                age,
                status: if active { UserStatus::Active } else { UserStatus::Disabled },
                created_at: at,
                updated_at: at,
                deleted_at: None,
            };
            let bytes = encode(&user).unwrap();
            prop_assert_eq!(decode(&bytes).unwrap(), user);
        }
    }
}
