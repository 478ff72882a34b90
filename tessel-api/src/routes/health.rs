//! Health Check Endpoints
//!
//! Provides Kubernetes-compatible health check endpoints:
//! - /health - Service identity and uptime
//! - /readiness - Store and cache connectivity
//! - /liveness - Process alive check
//!
//! Health endpoints answer plain JSON rather than the envelope.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tessel_core::{HealthCheck, HealthStatus};

use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_seconds: u64,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: state.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// GET /liveness
pub async fn liveness() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// GET /readiness - 503 unless every component is usable.
///
/// Each component reports `"ok"` or its failure message.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let checks = state.users.health().await;
    let (status_code, body) = readiness_body(&checks);
    (status_code, Json(body))
}

fn readiness_body(checks: &[HealthCheck]) -> (StatusCode, Value) {
    let ready = checks.iter().all(|c| c.status != HealthStatus::Unhealthy);

    let mut body = Map::new();
    body.insert(
        "status".to_string(),
        Value::from(if ready { "ready" } else { "not ready" }),
    );
    for check in checks {
        let detail = match check.status {
            HealthStatus::Unhealthy => check.message.clone().unwrap_or_else(|| "unhealthy".to_string()),
            HealthStatus::Degraded | HealthStatus::Healthy => "ok".to_string(),
        };
        body.insert(check.component.clone(), Value::from(detail));
    }

    if !ready {
        tracing::warn!(checks = ?checks, "Readiness check failed");
    }

    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Value::Object(body))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/readiness", get(readiness))
        .route("/liveness", get(liveness))
}
