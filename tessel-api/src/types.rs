//! API Request and Response Types
//!
//! Every response, successful or not, is wrapped in [`ApiResponse`]. The
//! envelope's `code` is the HTTP status of the response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tessel_core::{NewUser, RequestContext, User, UserId, UserStatus, UserUpdate};

use crate::error::ErrorCode;

// ============================================================================
// ENVELOPE
// ============================================================================

/// Uniform JSON envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// HTTP status of the response
    pub code: u16,
    pub message: String,
    /// Error category, present on failures only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Trace id of the server span that handled the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Successful response carrying `data`.
    pub fn success(ctx: &RequestContext, data: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            message: "success".to_string(),
            error: None,
            data: Some(data),
            trace_id: ctx.trace_id(),
        }
    }
}

impl ApiResponse<()> {
    /// Successful response without a payload.
    pub fn empty(ctx: &RequestContext) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            message: "success".to_string(),
            error: None,
            data: None,
            trace_id: ctx.trace_id(),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

// ============================================================================
// USER TYPES
// ============================================================================

/// Request naming a single user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdRequest {
    #[serde(default)]
    pub id: UserId,
}

/// Request to create a user.
///
/// Missing strings deserialize as empty so that they are reported as
/// validation failures rather than JSON rejections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub age: i32,
    #[serde(default)]
    pub status: UserStatus,
}

impl From<CreateUserRequest> for NewUser {
    fn from(req: CreateUserRequest) -> Self {
        NewUser {
            name: req.name,
            email: req.email,
            age: req.age,
            status: req.status,
        }
    }
}

/// Request to replace the mutable fields of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub age: i32,
    #[serde(default)]
    pub status: UserStatus,
}

impl From<UpdateUserRequest> for UserUpdate {
    fn from(req: UpdateUserRequest) -> Self {
        UserUpdate {
            id: req.id,
            name: req.name,
            email: req.email,
            age: req.age,
            status: req.status,
        }
    }
}

/// Response for listing users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserListResponse {
    pub users: Vec<User>,
    pub total: usize,
}

impl From<Vec<User>> for UserListResponse {
    fn from(users: Vec<User>) -> Self {
        Self {
            total: users.len(),
            users,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_shape() -> Result<(), serde_json::Error> {
        let ctx = RequestContext::background();
        let json = serde_json::to_value(ApiResponse::success(&ctx, 5))?;
        assert_eq!(json, serde_json::json!({ "code": 200, "message": "success", "data": 5 }));
        Ok(())
    }

    #[test]
    fn test_empty_envelope_omits_data() -> Result<(), serde_json::Error> {
        let ctx = RequestContext::background();
        let json = serde_json::to_string(&ApiResponse::empty(&ctx))?;
        assert!(!json.contains("data"));
        Ok(())
    }

    #[test]
    fn test_create_request_defaults() -> Result<(), serde_json::Error> {
        let req: CreateUserRequest = serde_json::from_str(r#"{"name":"A"}"#)?;
        let new = NewUser::from(req);
        assert_eq!(new.email, "");
        assert_eq!(new.status, UserStatus::Active);
        assert!(new.validate().is_err());
        Ok(())
    }

    #[test]
    fn test_update_request_without_id_is_invalid() -> Result<(), serde_json::Error> {
        let req: UpdateUserRequest =
            serde_json::from_str(r#"{"name":"B","email":"b@x.com","status":0}"#)?;
        let update = UserUpdate::from(req);
        assert_eq!(update.status, UserStatus::Disabled);
        assert!(update.validate().is_err());
        Ok(())
    }
}
