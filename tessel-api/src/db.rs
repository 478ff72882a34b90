//! Database Connection Pool Module
//!
//! PostgreSQL-backed [`UserStore`] using deadpool-postgres. All statements
//! touch the single `users` table; soft-deleted rows are invisible to every
//! read and write.

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tessel_core::{
    HealthCheck, NewUser, RequestContext, StorageError, TesselError, TesselResult, User, UserId,
    UserStatus, UserUpdate, ValidationError,
};
use tessel_storage::{UserStore, EMAIL_UNIQUE_CONSTRAINT};
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};

use crate::config::StoreBackend;
use crate::error::{ApiError, ApiResult};

/// Schema applied by [`PgUserStore::migrate`].
pub const USERS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id          BIGSERIAL PRIMARY KEY,
    name        VARCHAR(100) NOT NULL,
    email       VARCHAR(255) NOT NULL,
    age         INTEGER NOT NULL DEFAULT 0,
    status      INTEGER NOT NULL DEFAULT 1,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    deleted_at  TIMESTAMPTZ
);
CREATE UNIQUE INDEX IF NOT EXISTS users_email_key ON users (email) WHERE deleted_at IS NULL;
"#;

const USER_COLUMNS: &str = "id, name, email, age, status, created_at, updated_at, deleted_at";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub backend: StoreBackend,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection wait timeout in seconds
    pub timeout_secs: u64,
    /// Create the users table on startup
    pub auto_migrate: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            host: "localhost".to_string(),
            port: 5432,
            dbname: "tessel".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout_secs: 30,
            auto_migrate: true,
        }
    }
}

impl DbConfig {
    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.connect_timeout = Some(Duration::from_secs(self.timeout_secs));

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(Duration::from_secs(self.timeout_secs));
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))
    }
}

// ============================================================================
// POSTGRES USER STORE
// ============================================================================

/// User store over a Postgres connection pool.
#[derive(Clone)]
pub struct PgUserStore {
    pool: Pool,
}

impl PgUserStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Create the users table and its email index if missing.
    pub async fn migrate(&self) -> ApiResult<()> {
        let conn = self.pool.get().await?;
        conn.batch_execute(USERS_DDL).await?;
        tracing::info!("Users schema ready");
        Ok(())
    }

    async fn conn(&self) -> TesselResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            TesselError::Storage(StorageError::Unavailable {
                reason: e.to_string(),
            })
        })
    }
}

fn to_db_id(id: UserId) -> Option<i64> {
    i64::try_from(id.get()).ok()
}

fn row_to_user(row: &Row) -> TesselResult<User> {
    let id: i64 = row.try_get("id").map_err(query_failed)?;
    let status: i32 = row.try_get("status").map_err(query_failed)?;
    let id = u64::try_from(id).map_err(|_| StorageError::QueryFailed {
        reason: format!("negative user id {id}"),
    })?;
    let status = UserStatus::try_from(status).map_err(|e| StorageError::QueryFailed {
        reason: e.to_string(),
    })?;

    Ok(User {
        id: UserId::new(id),
        name: row.try_get("name").map_err(query_failed)?,
        email: row.try_get("email").map_err(query_failed)?,
        age: row.try_get("age").map_err(query_failed)?,
        status,
        created_at: row.try_get("created_at").map_err(query_failed)?,
        updated_at: row.try_get("updated_at").map_err(query_failed)?,
        deleted_at: row.try_get("deleted_at").map_err(query_failed)?,
    })
}

fn query_failed(err: tokio_postgres::Error) -> TesselError {
    TesselError::Storage(StorageError::QueryFailed {
        reason: err.to_string(),
    })
}

/// Map a write error, surfacing the unique email index as a validation error.
fn write_failed(err: tokio_postgres::Error, email: &str, id: Option<UserId>) -> TesselError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        return TesselError::Validation(ValidationError::ConstraintViolation {
            constraint: EMAIL_UNIQUE_CONSTRAINT.to_string(),
            reason: format!("email {email} is already in use"),
        });
    }
    let reason = err.to_string();
    TesselError::Storage(match id {
        Some(id) => StorageError::UpdateFailed { id, reason },
        None => StorageError::InsertFailed { reason },
    })
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, _ctx: &RequestContext, id: UserId) -> TesselResult<User> {
        let db_id = to_db_id(id).ok_or(TesselError::NotFound { id })?;
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"),
                &[&db_id],
            )
            .await
            .map_err(query_failed)?;

        match row {
            Some(row) => row_to_user(&row),
            None => Err(TesselError::NotFound { id }),
        }
    }

    async fn create(&self, _ctx: &RequestContext, new: NewUser) -> TesselResult<User> {
        let conn = self.conn().await?;
        let now = Utc::now();
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO users (name, email, age, status, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $5) RETURNING {USER_COLUMNS}"
                ),
                &[&new.name, &new.email, &new.age, &new.status.code(), &now],
            )
            .await
            .map_err(|e| write_failed(e, &new.email, None))?;
        row_to_user(&row)
    }

    async fn update(&self, _ctx: &RequestContext, update: UserUpdate) -> TesselResult<User> {
        let id = update.id;
        let db_id = to_db_id(id).ok_or(TesselError::NotFound { id })?;
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE users SET name = $2, email = $3, age = $4, status = $5, updated_at = $6 \
                     WHERE id = $1 AND deleted_at IS NULL RETURNING {USER_COLUMNS}"
                ),
                &[
                    &db_id,
                    &update.name,
                    &update.email,
                    &update.age,
                    &update.status.code(),
                    &Utc::now(),
                ],
            )
            .await
            .map_err(|e| write_failed(e, &update.email, Some(id)))?;

        match row {
            Some(row) => row_to_user(&row),
            None => Err(TesselError::NotFound { id }),
        }
    }

    async fn soft_delete(&self, _ctx: &RequestContext, id: UserId) -> TesselResult<()> {
        let db_id = to_db_id(id).ok_or(TesselError::NotFound { id })?;
        let conn = self.conn().await?;
        let affected = conn
            .execute(
                "UPDATE users SET deleted_at = $2, updated_at = $2 \
                 WHERE id = $1 AND deleted_at IS NULL",
                &[&db_id, &Utc::now()],
            )
            .await
            .map_err(|e| {
                TesselError::Storage(StorageError::UpdateFailed {
                    id,
                    reason: e.to_string(),
                })
            })?;

        if affected == 0 {
            return Err(TesselError::NotFound { id });
        }
        Ok(())
    }

    async fn list(&self, _ctx: &RequestContext) -> TesselResult<Vec<User>> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL ORDER BY id"),
                &[],
            )
            .await
            .map_err(query_failed)?;
        rows.iter().map(row_to_user).collect()
    }

    async fn ping(&self) -> HealthCheck {
        let start = Instant::now();
        let result = match self.pool.get().await {
            Ok(conn) => conn.simple_query("SELECT 1").await.map(|_| ()).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        let elapsed = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => HealthCheck::healthy("database")
                .with_response_time(elapsed)
                .with_metadata("backend", "postgres".into())
                .with_metadata("pool_size", self.pool_size().into()),
            Err(e) => HealthCheck::unhealthy("database", format!("Database check failed: {}", e))
                .with_response_time(elapsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_db_config() {
        let config = DbConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.max_size, 16);
        assert!(config.auto_migrate);
        assert_eq!(config.backend, StoreBackend::Postgres);
    }

    #[test]
    fn test_ids_beyond_bigint_are_unaddressable() {
        assert_eq!(to_db_id(UserId::new(42)), Some(42));
        assert_eq!(to_db_id(UserId::new(u64::MAX)), None);
    }

    #[test]
    fn test_ddl_names_the_email_constraint() {
        assert!(USERS_DDL.contains(EMAIL_UNIQUE_CONSTRAINT));
        assert!(USERS_DDL.contains("deleted_at IS NULL"));
    }

    #[tokio::test]
    async fn test_pool_creation_is_lazy() -> Result<(), String> {
        // No connection is attempted until the first checkout.
        let store = PgUserStore::from_config(&DbConfig::default()).map_err(|e| e.message)?;
        assert_eq!(store.pool_size(), 0);
        Ok(())
    }
}
