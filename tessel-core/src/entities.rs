//! Core entity structures

use crate::{Timestamp, UserId, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account status of a user.
///
/// Serialized as its integer code (1 = active, 0 = disabled) so the cached
/// representation and the database column agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum UserStatus {
    #[default]
    Active,
    Disabled,
}

impl UserStatus {
    pub const fn code(self) -> i32 {
        match self {
            UserStatus::Active => 1,
            UserStatus::Disabled => 0,
        }
    }
}

impl TryFrom<i32> for UserStatus {
    type Error = ValidationError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(UserStatus::Active),
            0 => Ok(UserStatus::Disabled),
            other => Err(ValidationError::InvalidValue {
                field: "status".to_string(),
                reason: format!("unknown status code {other}"),
            }),
        }
    }
}

impl From<UserStatus> for i32 {
    fn from(status: UserStatus) -> Self {
        status.code()
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserStatus::Active => f.write_str("active"),
            UserStatus::Disabled => f.write_str("disabled"),
        }
    }
}

/// User - the single entity served by Tessel.
/// The backing store owns the authoritative copy; the cache holds a shadow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub age: i32,
    pub status: UserStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Soft-delete marker. Deleted rows are invisible to reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
}

impl User {
    /// Materialize a freshly inserted row.
    pub fn from_new(id: UserId, new: NewUser, now: Timestamp) -> Self {
        Self {
            id,
            name: new.name,
            email: new.email,
            age: new.age,
            status: new.status,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Replace the mutable fields from an update. `created_at` is kept.
    pub fn apply(&mut self, update: &UserUpdate, now: Timestamp) {
        self.name = update.name.clone();
        self.email = update.email.clone();
        self.age = update.age;
        self.status = update.status;
        self.updated_at = now;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Payload for creating a user. The id is assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub age: i32,
    #[serde(default)]
    pub status: UserStatus,
}

impl NewUser {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("name", &self.name)?;
        require_non_empty("email", &self.email)
    }
}

/// Payload for updating a user. Replaces name, email, age and status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdate {
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub age: i32,
    #[serde(default)]
    pub status: UserStatus,
}

impl UserUpdate {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.id.is_valid() {
            return Err(ValidationError::InvalidValue {
                field: "id".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        require_non_empty("name", &self.name)?;
        require_non_empty("email", &self.email)
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        });
    }
    Ok(())
}
