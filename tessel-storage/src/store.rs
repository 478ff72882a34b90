//! Backing store for user records.
//!
//! `UserStore` is the authoritative source of truth. Implementations report
//! a missing or soft-deleted row as `TesselError::NotFound` and a duplicate
//! email as a validation error.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tessel_core::{
    HealthCheck, NewUser, RequestContext, StorageError, TesselError, TesselResult, User, UserId,
    UserUpdate, ValidationError,
};

/// Name reported for the unique-email constraint, matching the Postgres index.
pub const EMAIL_UNIQUE_CONSTRAINT: &str = "users_email_key";

/// Async user store.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetch a live user by id.
    async fn find_by_id(&self, ctx: &RequestContext, id: UserId) -> TesselResult<User>;

    /// Insert a new user and return it with its assigned id.
    async fn create(&self, ctx: &RequestContext, new: NewUser) -> TesselResult<User>;

    /// Replace name, email, age and status of a live user.
    async fn update(&self, ctx: &RequestContext, update: UserUpdate) -> TesselResult<User>;

    /// Mark a live user as deleted.
    async fn soft_delete(&self, ctx: &RequestContext, id: UserId) -> TesselResult<()>;

    /// All live users ordered by id.
    async fn list(&self, ctx: &RequestContext) -> TesselResult<Vec<User>>;

    async fn ping(&self) -> HealthCheck;
}

pub(crate) fn duplicate_email(email: &str) -> TesselError {
    TesselError::Validation(ValidationError::ConstraintViolation {
        constraint: EMAIL_UNIQUE_CONSTRAINT.to_string(),
        reason: format!("email {email} is already in use"),
    })
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// In-memory user store for tests and local development.
#[derive(Debug)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<UserId, User>>,
    next_id: AtomicU64,
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row as-is, bypassing validation. Later ids are allocated
    /// above the highest seeded id.
    pub fn seed(&self, user: User) -> TesselResult<()> {
        let mut users = self.users.write().map_err(|_| StorageError::LockPoisoned)?;
        self.next_id
            .fetch_max(user.id.get() + 1, Ordering::SeqCst);
        users.insert(user.id, user);
        Ok(())
    }

    /// Read a row including soft-deleted ones.
    pub fn raw(&self, id: UserId) -> Option<User> {
        self.users.read().ok()?.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.users.read().map(|u| u.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn email_taken(users: &HashMap<UserId, User>, email: &str, except: Option<UserId>) -> bool {
        users
            .values()
            .any(|u| !u.is_deleted() && u.email == email && Some(u.id) != except)
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_id(&self, _ctx: &RequestContext, id: UserId) -> TesselResult<User> {
        let users = self.users.read().map_err(|_| StorageError::LockPoisoned)?;
        users
            .get(&id)
            .filter(|u| !u.is_deleted())
            .cloned()
            .ok_or(TesselError::NotFound { id })
    }

    async fn create(&self, _ctx: &RequestContext, new: NewUser) -> TesselResult<User> {
        new.validate()?;
        let mut users = self.users.write().map_err(|_| StorageError::LockPoisoned)?;
        if Self::email_taken(&users, &new.email, None) {
            return Err(duplicate_email(&new.email));
        }
        let id = UserId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let user = User::from_new(id, new, Utc::now());
        users.insert(id, user.clone());
        Ok(user)
    }

    async fn update(&self, _ctx: &RequestContext, update: UserUpdate) -> TesselResult<User> {
        update.validate()?;
        let mut users = self.users.write().map_err(|_| StorageError::LockPoisoned)?;
        if Self::email_taken(&users, &update.email, Some(update.id)) {
            return Err(duplicate_email(&update.email));
        }
        let user = users
            .get_mut(&update.id)
            .filter(|u| !u.is_deleted())
            .ok_or(TesselError::NotFound { id: update.id })?;
        user.apply(&update, Utc::now());
        Ok(user.clone())
    }

    async fn soft_delete(&self, _ctx: &RequestContext, id: UserId) -> TesselResult<()> {
        let mut users = self.users.write().map_err(|_| StorageError::LockPoisoned)?;
        let user = users
            .get_mut(&id)
            .filter(|u| !u.is_deleted())
            .ok_or(TesselError::NotFound { id })?;
        let now = Utc::now();
        user.deleted_at = Some(now);
        user.updated_at = now;
        Ok(())
    }

    async fn list(&self, _ctx: &RequestContext) -> TesselResult<Vec<User>> {
        let users = self.users.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut live: Vec<User> = users.values().filter(|u| !u.is_deleted()).cloned().collect();
        live.sort_by_key(|u| u.id);
        Ok(live)
    }

    async fn ping(&self) -> HealthCheck {
        match self.users.read() {
            Ok(users) => HealthCheck::healthy("user_store")
                .with_metadata("backend", "memory".into())
                .with_metadata("rows", users.len().into()),
            Err(_) => HealthCheck::unhealthy("user_store", "lock poisoned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_core::UserStatus;

    fn new_user(name: &str, email: &str) -> NewUser {
        NewUser {
            name: name.to_string(),
            email: email.to_string(),
            age: 20,
            status: UserStatus::Active,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let store = InMemoryUserStore::new();
        let ctx = RequestContext::background();
        let a = store.create(&ctx, new_user("A", "a@x.com")).await.unwrap();
        let b = store.create(&ctx, new_user("B", "b@x.com")).await.unwrap();
        assert_eq!(a.id, UserId::new(1));
        assert_eq!(b.id, UserId::new(2));
        assert_eq!(store.find_by_id(&ctx, a.id).await.unwrap(), a);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_validation_error() {
        let store = InMemoryUserStore::new();
        let ctx = RequestContext::background();
        store.create(&ctx, new_user("A", "a@x.com")).await.unwrap();
        let err = store.create(&ctx, new_user("A2", "a@x.com")).await.unwrap_err();
        assert!(matches!(
            err,
            TesselError::Validation(ValidationError::ConstraintViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_may_keep_own_email() {
        let store = InMemoryUserStore::new();
        let ctx = RequestContext::background();
        let a = store.create(&ctx, new_user("A", "a@x.com")).await.unwrap();
        let updated = store
            .update(
                &ctx,
                UserUpdate {
                    id: a.id,
                    name: "B".to_string(),
                    email: "a@x.com".to_string(),
                    age: 21,
                    status: UserStatus::Disabled,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "B");
        assert_eq!(updated.created_at, a.created_at);
    }

    #[tokio::test]
    async fn test_soft_deleted_rows_are_not_found() {
        let store = InMemoryUserStore::new();
        let ctx = RequestContext::background();
        let a = store.create(&ctx, new_user("A", "a@x.com")).await.unwrap();
        store.soft_delete(&ctx, a.id).await.unwrap();

        assert_eq!(
            store.find_by_id(&ctx, a.id).await,
            Err(TesselError::NotFound { id: a.id })
        );
        assert!(store.raw(a.id).unwrap().is_deleted());
        assert!(store.list(&ctx).await.unwrap().is_empty());
        assert!(store.soft_delete(&ctx, a.id).await.is_err());

        // The email is free again once its owner is deleted.
        assert!(store.create(&ctx, new_user("A", "a@x.com")).await.is_ok());
    }

    #[tokio::test]
    async fn test_seed_moves_id_allocation_past_seeded_rows() {
        let store = InMemoryUserStore::new();
        let ctx = RequestContext::background();
        let mut seeded = store.create(&ctx, new_user("S", "s@x.com")).await.unwrap();
        seeded.id = UserId::new(10);
        store.seed(seeded).unwrap();

        let next = store.create(&ctx, new_user("N", "n@x.com")).await.unwrap();
        assert_eq!(next.id, UserId::new(11));
    }
}
