//! Shared helpers for router-level tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header::CONTENT_TYPE, HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tessel_api::config::{CacheBackendKind, CacheSettings, StoreBackend};
use tessel_api::telemetry::Telemetry;
use tessel_api::{create_api_router, AppConfig, AppState, DbConfig, ServiceContext};
use tessel_storage::{InMemoryCacheBackend, InMemoryUserStore};
use tessel_test_utils::spans::SpanCapture;
use tower::ServiceExt;

/// A router over in-memory backends with spans captured in memory.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryUserStore>,
    pub cache: Arc<InMemoryCacheBackend>,
    pub capture: SpanCapture,
}

pub fn memory_config() -> AppConfig {
    AppConfig {
        database: DbConfig {
            backend: StoreBackend::Memory,
            ..Default::default()
        },
        cache: CacheSettings {
            backend: CacheBackendKind::Memory,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn test_app() -> Result<TestApp, String> {
    let capture = SpanCapture::new();
    let store = Arc::new(InMemoryUserStore::new());
    let cache = Arc::new(InMemoryCacheBackend::new());
    let service = ServiceContext::assemble(
        memory_config(),
        Telemetry::from_provider(capture.provider().clone()),
        store.clone(),
        cache.clone(),
    )
    .map_err(|e| e.message)?;

    let state = service.state();
    let router = create_api_router(state.clone(), &service.config().app);
    Ok(TestApp {
        router,
        state,
        store,
        cache,
        capture,
    })
}

/// Decoded response parts.
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Result<Reply, String> {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| e.to_string())?
        };
        Ok(Reply {
            status,
            headers,
            body,
        })
    }

    /// Send a request and return the raw body as text.
    pub async fn send_text(&self, request: Request<Body>) -> Result<(StatusCode, String), String> {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        Ok((status, String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Wait for detached cache populations to finish.
    pub async fn settle(&self) -> Result<(), String> {
        if self.state.users.cached().drain(Duration::from_secs(2)).await {
            Ok(())
        } else {
            Err("cache populations did not finish".to_string())
        }
    }
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Result<Request<Body>, String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .map_err(|e| e.to_string())
}

pub fn get_request(uri: &str) -> Result<Request<Body>, String> {
    Request::get(uri).body(Body::empty()).map_err(|e| e.to_string())
}
