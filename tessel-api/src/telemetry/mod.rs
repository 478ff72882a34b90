//! Tessel Telemetry - Observability Infrastructure
//!
//! Provides OpenTelemetry tracing and Prometheus metrics for the API layer.
//! Everything works without a collector; the OTLP exporter is only attached
//! when an endpoint is configured.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics_handler, TesselMetrics, METRICS};
pub use middleware::{observability_middleware, TRACE_ID_HEADER};
pub use tracer::{init_tracer, shutdown_tracer, Telemetry, TelemetryConfig, TRACER_NAME};
