//! User REST API Routes
//!
//! Mounted under `/api/user`. Every handler receives the request context
//! from the observability middleware and answers with the JSON envelope.

use axum::{
    extract::State,
    routing::{get, post, put},
    Router,
};
use tessel_core::{RequestContext, TesselError, User, UserId};

use crate::{
    error::{ApiError, ApiResult},
    extractors::{ApiJson, Ctx},
    services::UserService,
    state::AppState,
    types::{ApiResponse, CreateUserRequest, UpdateUserRequest, UserIdRequest, UserListResponse},
};

/// Map a service error to the envelope, tagged with the request's trace id.
fn failed(ctx: &RequestContext) -> impl Fn(TesselError) -> ApiError + '_ {
    move |err| ApiError::from(err).with_trace(ctx)
}

fn require_id(ctx: &RequestContext, id: UserId) -> ApiResult<UserId> {
    if id.is_valid() {
        Ok(id)
    } else {
        Err(ApiError::missing_field("id").with_trace(ctx))
    }
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/user/query - Read one user through the cache
pub async fn query_user(
    State(users): State<UserService>,
    Ctx(ctx): Ctx,
    ApiJson(req): ApiJson<UserIdRequest>,
) -> ApiResult<ApiResponse<User>> {
    let id = require_id(&ctx, req.id)?;
    let user = users.query(&ctx, id).await.map_err(failed(&ctx))?;
    Ok(ApiResponse::success(&ctx, user))
}

/// POST /api/user/create - Create a user
pub async fn create_user(
    State(users): State<UserService>,
    Ctx(ctx): Ctx,
    ApiJson(req): ApiJson<CreateUserRequest>,
) -> ApiResult<ApiResponse<User>> {
    let user = users.create(&ctx, req.into()).await.map_err(failed(&ctx))?;
    tracing::info!(user_id = %user.id, trace_id = %ctx.trace_id().unwrap_or_default(), "User created");
    Ok(ApiResponse::success(&ctx, user))
}

/// PUT /api/user/update - Replace a user's mutable fields
pub async fn update_user(
    State(users): State<UserService>,
    Ctx(ctx): Ctx,
    ApiJson(req): ApiJson<UpdateUserRequest>,
) -> ApiResult<ApiResponse<User>> {
    let user = users.update(&ctx, req.into()).await.map_err(failed(&ctx))?;
    Ok(ApiResponse::success(&ctx, user))
}

/// POST /api/user/delete - Soft delete a user
pub async fn delete_user(
    State(users): State<UserService>,
    Ctx(ctx): Ctx,
    ApiJson(req): ApiJson<UserIdRequest>,
) -> ApiResult<ApiResponse<()>> {
    let id = require_id(&ctx, req.id)?;
    users.delete(&ctx, id).await.map_err(failed(&ctx))?;
    tracing::info!(user_id = %id, trace_id = %ctx.trace_id().unwrap_or_default(), "User deleted");
    Ok(ApiResponse::empty(&ctx))
}

/// GET /api/user/list - All live users, read from the store
pub async fn list_users(
    State(users): State<UserService>,
    Ctx(ctx): Ctx,
) -> ApiResult<ApiResponse<UserListResponse>> {
    let all = users.list(&ctx).await.map_err(failed(&ctx))?;
    Ok(ApiResponse::success(&ctx, all.into()))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/query", post(query_user))
        .route("/create", post(create_user))
        .route("/update", put(update_user))
        .route("/delete", post(delete_user))
        .route("/list", get(list_users))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_require_id_rejects_zero() {
        let ctx = RequestContext::background();
        assert!(require_id(&ctx, UserId::new(3)).is_ok());
        let err = require_id(&ctx, UserId::default()).err();
        assert!(matches!(err, Some(e) if e.code == ErrorCode::MissingField));
    }

    #[test]
    fn test_failed_maps_not_found() {
        let ctx = RequestContext::background();
        let err = failed(&ctx)(TesselError::NotFound { id: UserId::new(9) });
        assert_eq!(err.code, ErrorCode::UserNotFound);
    }
}
