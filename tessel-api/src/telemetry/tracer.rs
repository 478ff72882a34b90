//! OpenTelemetry Tracer Initialization
//!
//! Sets up the OTLP/HTTP exporter, W3C trace-context propagation and the
//! tracing-subscriber stack. The returned [`Telemetry`] owns the provider
//! and hands out the [`TracerHandle`] used by every traced operation.

use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    trace::{BatchConfigBuilder, BatchSpanProcessor, RandomIdGenerator, Sampler, SdkTracerProvider},
    Resource,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tessel_core::TracerHandle;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

/// Instrumentation scope name for spans emitted by this crate.
pub const TRACER_NAME: &str = "tessel-api";

/// Tracing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Disabled tracing installs a no-op tracer handle.
    pub enabled: bool,
    /// OTLP/HTTP endpoint for traces (e.g., "http://localhost:4318/v1/traces")
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
    pub service_version: String,
    /// Copied from the server section when loading.
    pub environment: String,
    /// Ratio of root traces sampled, in (0, 1]. Other values mean 1.0.
    pub sample_rate: f64,
    pub batch_size: usize,
    pub batch_timeout_secs: u64,
    pub export_timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            otlp_endpoint: None,
            service_name: "tessel-api".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            sample_rate: 1.0,
            batch_size: 512,
            batch_timeout_secs: 5,
            export_timeout_secs: 30,
        }
    }
}

impl TelemetryConfig {
    /// Effective sample rate after range checking.
    pub fn effective_sample_rate(&self) -> f64 {
        if self.sample_rate > 0.0 && self.sample_rate <= 1.0 {
            self.sample_rate
        } else {
            1.0
        }
    }

    /// Parent-based sampler so downstream services follow the caller's decision.
    pub fn sampler(&self) -> Sampler {
        let rate = self.effective_sample_rate();
        let root = if rate >= 1.0 {
            Sampler::AlwaysOn
        } else {
            Sampler::TraceIdRatioBased(rate)
        };
        Sampler::ParentBased(Box::new(root))
    }
}

/// Installed tracing state.
pub struct Telemetry {
    provider: Option<SdkTracerProvider>,
    tracer: TracerHandle,
}

impl Telemetry {
    /// Telemetry with tracing turned off.
    pub fn disabled() -> Self {
        Self {
            provider: None,
            tracer: TracerHandle::noop(),
        }
    }

    /// Wrap an existing provider, e.g. one with an in-memory exporter.
    pub fn from_provider(provider: SdkTracerProvider) -> Self {
        let tracer = TracerHandle::new(provider.tracer(TRACER_NAME));
        Self {
            provider: Some(provider),
            tracer,
        }
    }

    pub fn tracer(&self) -> TracerHandle {
        self.tracer.clone()
    }

    pub fn provider(&self) -> Option<&SdkTracerProvider> {
        self.provider.as_ref()
    }
}

fn build_provider(config: &TelemetryConfig) -> ApiResult<SdkTracerProvider> {
    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes([
            KeyValue::new("service.version", config.service_version.clone()),
            KeyValue::new("deployment.environment", config.environment.clone()),
        ])
        .build();

    let builder = SdkTracerProvider::builder()
        .with_sampler(config.sampler())
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource);

    let Some(endpoint) = &config.otlp_endpoint else {
        // No exporter: spans still carry ids for logs and responses.
        return Ok(builder.build());
    };

    let exporter = SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(config.export_timeout_secs))
        .build()
        .map_err(|e| ApiError::internal_error(format!("Failed to create OTLP exporter: {}", e)))?;

    let processor = BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            BatchConfigBuilder::default()
                .with_max_export_batch_size(config.batch_size)
                .with_scheduled_delay(Duration::from_secs(config.batch_timeout_secs))
                .build(),
        )
        .build();

    Ok(builder.with_span_processor(processor).build())
}

/// Initialize the tracer provider and the tracing subscriber.
///
/// Must be called once at startup before any tracing occurs. Sets up:
/// - OTLP exporter with batching (if an endpoint is configured)
/// - TraceContext propagation (W3C traceparent header)
/// - tracing-subscriber with JSON output and an OpenTelemetry layer
pub fn init_tracer(config: &TelemetryConfig) -> ApiResult<Telemetry> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let telemetry = if config.enabled {
        Telemetry::from_provider(build_provider(config)?)
    } else {
        Telemetry::disabled()
    };

    let otel_layer = telemetry
        .provider
        .as_ref()
        .map(|provider| OpenTelemetryLayer::new(provider.tracer(TRACER_NAME)));
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tessel_api=debug,tessel_storage=debug,tower_http=debug,info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .with(otel_layer)
        .try_init()
        .map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = config.service_name,
        environment = config.environment,
        enabled = config.enabled,
        otlp_endpoint = ?config.otlp_endpoint,
        sample_rate = config.effective_sample_rate(),
        "Telemetry initialized"
    );

    Ok(telemetry)
}

/// Flush pending spans and shut the provider down.
///
/// Should be called before application exit.
pub fn shutdown_tracer(provider: &SdkTracerProvider) {
    if let Err(e) = provider.force_flush() {
        tracing::warn!(error = %e, "Failed to flush spans");
    }
    match provider.shutdown() {
        Ok(()) => tracing::info!("Tracer shutdown complete"),
        Err(e) => tracing::warn!(error = %e, "Tracer shutdown failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "tessel-api");
        assert_eq!(config.sample_rate, 1.0);
        assert_eq!(config.batch_size, 512);
        assert!(config.enabled);
    }

    #[test]
    fn test_out_of_range_sample_rates_fall_back_to_always() {
        for rate in [0.0, -0.5, 1.5, f64::NAN] {
            let config = TelemetryConfig {
                sample_rate: rate,
                ..Default::default()
            };
            assert_eq!(config.effective_sample_rate(), 1.0, "rate {rate}");
        }

        let config = TelemetryConfig {
            sample_rate: 0.5,
            ..Default::default()
        };
        assert_eq!(config.effective_sample_rate(), 0.5);
    }

    #[test]
    fn test_sampler_is_parent_based() {
        let config = TelemetryConfig {
            sample_rate: 0.1,
            ..Default::default()
        };
        assert!(matches!(config.sampler(), Sampler::ParentBased(_)));
    }

    #[test]
    fn test_disabled_telemetry_has_noop_tracer() {
        let telemetry = Telemetry::disabled();
        assert!(!telemetry.tracer().is_enabled());
        assert!(telemetry.provider().is_none());
    }

    #[test]
    fn test_provider_without_endpoint_builds() -> Result<(), String> {
        let provider = build_provider(&TelemetryConfig::default()).map_err(|e| e.message)?;
        let telemetry = Telemetry::from_provider(provider);
        assert!(telemetry.tracer().is_enabled());
        Ok(())
    }
}
