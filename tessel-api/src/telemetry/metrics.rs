//! Prometheus Metrics Definitions
//!
//! HTTP and downstream metrics are recorded as they happen. Cache metrics
//! mirror the read-through layer's [`CacheStats`] and are refreshed on every
//! scrape of `/metrics`.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, register_int_gauge,
    register_int_gauge_vec, CounterVec, Encoder, Gauge, HistogramVec, IntGauge, IntGaugeVec,
    TextEncoder,
};
use tessel_storage::CacheStats;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized on first use
pub static METRICS: Lazy<ApiResult<TesselMetrics>> = Lazy::new(TesselMetrics::new);

/// Container for all Tessel metrics.
#[derive(Clone)]
pub struct TesselMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Downstream call counter - labels: operation, status
    pub downstream_calls_total: CounterVec,

    /// Cumulative cache events sampled at scrape - labels: event
    pub cache_events: IntGaugeVec,

    /// Fraction of cache lookups answered from the cache
    pub cache_hit_ratio: Gauge,

    /// Population tasks still running
    pub cache_populations_in_flight: IntGauge,
}

impl TesselMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "tessel_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| registration_failed("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "tessel_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_failed("http_request_duration_seconds", e))?,

            downstream_calls_total: register_counter_vec!(
                "tessel_downstream_calls_total",
                "Total downstream service calls",
                &["operation", "status"]
            )
            .map_err(|e| registration_failed("downstream_calls_total", e))?,

            cache_events: register_int_gauge_vec!(
                "tessel_cache_events",
                "Cumulative read-through cache events by kind",
                &["event"]
            )
            .map_err(|e| registration_failed("cache_events", e))?,

            cache_hit_ratio: register_gauge!(
                "tessel_cache_hit_ratio",
                "Fraction of cache lookups answered from the cache"
            )
            .map_err(|e| registration_failed("cache_hit_ratio", e))?,

            cache_populations_in_flight: register_int_gauge!(
                "tessel_cache_populations_in_flight",
                "Cache population tasks still running"
            )
            .map_err(|e| registration_failed("cache_populations_in_flight", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record a downstream call.
    pub fn record_downstream_call(&self, operation: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.downstream_calls_total
            .with_label_values(&[operation, status])
            .inc();
    }

    /// Copy a cache statistics snapshot into the cache gauges.
    pub fn observe_cache(&self, stats: &CacheStats, in_flight: usize) {
        let events = [
            ("hit", stats.hits),
            ("miss", stats.misses),
            ("error", stats.errors),
            ("corrupt", stats.corrupt),
            ("population", stats.populations),
            ("population_failure", stats.population_failures),
            ("invalidation", stats.invalidations),
            ("invalidation_failure", stats.invalidation_failures),
        ];
        for (event, count) in events {
            self.cache_events
                .with_label_values(&[event])
                .set(i64::try_from(count).unwrap_or(i64::MAX));
        }
        self.cache_hit_ratio.set(stats.hit_rate());
        self.cache_populations_in_flight
            .set(i64::try_from(in_flight).unwrap_or(i64::MAX));
    }
}

fn registration_failed(name: &str, err: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, err))
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    if let Ok(metrics) = METRICS.as_ref() {
        let cached = state.users.cached();
        metrics.observe_cache(&cached.stats(), cached.populations_in_flight());
    }

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
