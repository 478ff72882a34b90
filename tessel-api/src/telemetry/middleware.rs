//! Axum Middleware for HTTP Request Tracing and Metrics
//!
//! Provides automatic instrumentation of all HTTP requests with:
//! - A server span continuing any incoming W3C trace context
//! - The per-request `RequestContext` (deadline and cancellation)
//! - Prometheus metrics collection
//! - A completion log line carrying the trace id

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use once_cell::sync::Lazy;
use opentelemetry::{
    propagation::TextMapPropagator,
    trace::{SpanKind, Status, TraceContextExt, Tracer},
    Context, KeyValue,
};
use opentelemetry_http::HeaderExtractor;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use regex::Regex;
use std::time::Instant;
use tessel_core::RequestContext;
use tracing::{info_span, Instrument};

use super::metrics::METRICS;
use crate::state::AppState;

/// Response header carrying the trace id of the server span.
pub static TRACE_ID_HEADER: HeaderName = HeaderName::from_static("x-trace-id");

static ID_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"/\d+(/|$)").ok());

/// Extract trace context from incoming request headers.
///
/// Looks for the W3C traceparent header for distributed tracing.
fn extract_trace_context(headers: &HeaderMap) -> Context {
    TraceContextPropagator::new().extract(&HeaderExtractor(headers))
}

/// Normalize path for metrics/spans (replace numeric ids with placeholders).
///
/// This prevents high-cardinality label explosion in Prometheus.
pub fn normalize_path(path: &str) -> String {
    match ID_PATTERN.as_ref() {
        Some(pattern) => pattern.replace_all(path, "/{id}$1").into_owned(),
        None => path.to_string(),
    }
}

/// Observability middleware for Axum.
///
/// Wraps every request with:
/// 1. A server span (with trace context propagation)
/// 2. A `RequestContext` in the request extensions, cancelled when the
///    request future completes or is dropped
/// 3. Prometheus metrics recording
/// 4. Request/response logging
pub async fn observability_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let normalized_path = normalize_path(&path);

    let parent_context = extract_trace_context(request.headers());
    let otel = if state.tracer.is_enabled() {
        let tracer = state.tracer.tracer();
        let span = tracer
            .span_builder(format!("{} {}", method, normalized_path))
            .with_kind(SpanKind::Server)
            .with_attributes(vec![
                KeyValue::new("http.method", method.to_string()),
                KeyValue::new("http.target", path.clone()),
                KeyValue::new("http.route", normalized_path.clone()),
            ])
            .start_with_context(tracer, &parent_context);
        parent_context.with_span(span)
    } else {
        parent_context
    };

    let (ctx, cancel) = RequestContext::background()
        .with_otel(otel)
        .with_timeout(state.request_timeout)
        .with_cancellation();
    let trace_id = ctx.trace_id();
    request.extensions_mut().insert(ctx.clone());

    let tracing_span = info_span!(
        "http_request",
        http.method = %method,
        http.target = %path,
        http.route = %normalized_path,
        trace_id = %trace_id.as_deref().unwrap_or_default(),
        otel.kind = "server",
    );

    let mut response = next.run(request).instrument(tracing_span).await;
    // The handler is done; anything still holding the request context sees
    // it cancelled. Detached work carries its own signal.
    cancel.cancel();

    let duration = start.elapsed();
    let status = response.status();

    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_http_request(
            method.as_str(),
            &normalized_path,
            status.as_u16(),
            duration.as_secs_f64(),
        );
    }

    let span = ctx.otel().span();
    span.set_attribute(KeyValue::new("http.status_code", status.as_u16() as i64));
    if status.is_server_error() {
        span.set_status(Status::error("Server error"));
    } else if status.is_client_error() {
        span.set_status(Status::error("Client error"));
    } else {
        span.set_status(Status::Ok);
    }
    span.end();

    if let Some(value) = trace_id.as_deref().and_then(|id| HeaderValue::from_str(id).ok()) {
        response.headers_mut().insert(TRACE_ID_HEADER.clone(), value);
    }

    tracing::info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = duration.as_millis() as u64,
        trace_id = %trace_id.as_deref().unwrap_or_default(),
        "Request completed"
    );

    response
}
