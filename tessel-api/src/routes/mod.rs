//! REST API Routes Module
//!
//! Includes:
//! - User routes under `/api/user`
//! - Health check endpoints (Kubernetes-compatible)
//! - Prometheus `/metrics`
//! - CORS, panic recovery and the observability middleware

pub mod health;
pub mod user;

use std::any::Any;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method, Uri},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::extractors::Ctx;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware, TRACE_ID_HEADER};

const CORS_MAX_AGE: Duration = Duration::from_secs(86_400);

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::HeaderName::from_static("traceparent"),
            header::HeaderName::from_static("tracestate"),
        ])
        .expose_headers([TRACE_ID_HEADER.clone()])
        .max_age(CORS_MAX_AGE);

    if origins.is_empty() {
        // Development mode: allow all origins
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(AnyOrigin)
    } else {
        tracing::info!("CORS: allowing origins: {:?}", origins);
        let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(origins)
    }
}

/// Envelope returned when a handler panics.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    tracing::error!(panic = %detail, "Handler panicked");
    ApiError::internal_error("Internal server error").into_response()
}

async fn route_not_found(Ctx(ctx): Ctx, uri: Uri) -> ApiError {
    ApiError::route_not_found(uri.path()).with_trace(&ctx)
}

/// Wrap `routes` in the shared layers and bind the state.
///
/// Panics are caught inside the observability middleware so they are
/// logged, counted and traced like any other 500.
fn with_layers(routes: Router<AppState>, state: AppState, server: &ServerConfig) -> Router {
    routes
        .fallback(route_not_found)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(from_fn_with_state(state.clone(), observability_middleware))
        .layer(build_cors_layer(&server.cors_origins))
        .with_state(state)
}

/// Create the complete API router.
pub fn create_api_router(state: AppState, server: &ServerConfig) -> Router {
    let routes = Router::new()
        .nest("/api/user", user::create_router())
        .merge(health::create_router())
        .route("/metrics", get(metrics_handler));

    with_layers(routes, state, server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Telemetry;
    use crate::types::ApiResponse;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tessel_storage::{InMemoryCacheBackend, InMemoryUserStore};
    use tower::ServiceExt;

    fn state() -> Result<AppState, String> {
        let service = crate::state::ServiceContext::assemble(
            Default::default(),
            Telemetry::disabled(),
            Arc::new(InMemoryUserStore::new()),
            Arc::new(InMemoryCacheBackend::new()),
        )
        .map_err(|e| e.message)?;
        Ok(service.state())
    }

    async fn envelope(response: Response) -> Result<ApiResponse<serde_json::Value>, String> {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        serde_json::from_slice(&bytes).map_err(|e| e.to_string())
    }

    #[tokio::test]
    async fn test_unknown_route_is_enveloped_404() -> Result<(), String> {
        let app = create_api_router(state()?, &ServerConfig::default());
        let response = app
            .oneshot(Request::get("/nope").body(Body::empty()).map_err(|e| e.to_string())?)
            .await
            .map_err(|e| e.to_string())?;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = envelope(response).await?;
        assert_eq!(body.code, 404);
        assert_eq!(body.error, Some(crate::error::ErrorCode::RouteNotFound));
        Ok(())
    }

    #[tokio::test]
    async fn test_panicking_handler_returns_500_envelope() -> Result<(), String> {
        async fn boom() -> &'static str {
            panic!("boom")
        }
        let routes = Router::new().route("/boom", get(boom));
        let app = with_layers(routes, state()?, &ServerConfig::default());

        let response = app
            .oneshot(Request::get("/boom").body(Body::empty()).map_err(|e| e.to_string())?)
            .await
            .map_err(|e| e.to_string())?;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = envelope(response).await?;
        assert_eq!(body.code, 500);
        assert_eq!(body.message, "Internal server error");
        Ok(())
    }

    #[tokio::test]
    async fn test_liveness() -> Result<(), String> {
        let app = create_api_router(state()?, &ServerConfig::default());
        let response = app
            .oneshot(Request::get("/liveness").body(Body::empty()).map_err(|e| e.to_string())?)
            .await
            .map_err(|e| e.to_string())?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }
}
