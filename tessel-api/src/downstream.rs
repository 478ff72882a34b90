//! Downstream service client.
//!
//! An optional HTTP dependency exposing `POST /api/calculate` and
//! `POST /api/process`. Both calls are traced operations and carry the
//! caller's trace context in a W3C `traceparent` header. The downstream
//! answers with `{code, message, data}` where code 0 means success.

use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::KeyValue;
use opentelemetry_http::HeaderInjector;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tessel_core::{Interrupted, RequestContext, TracedOperation, TracerHandle};
use thiserror::Error;

use crate::error::{ApiError, ApiResult};
use crate::telemetry::METRICS;

/// Downstream service settings. No base URL disables the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("Request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("Invalid response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("Downstream rejected the call with code {code}: {message}")]
    Rejected { code: i64, message: String },

    #[error("Downstream call interrupted: {0}")]
    Interrupted(#[from] Interrupted),
}

#[derive(Debug, Deserialize)]
struct DownstreamResponse {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

/// Traced client for the downstream service.
#[derive(Clone, Debug)]
pub struct DownstreamClient {
    calculate: TracedOperation<i64, Value, DownstreamError>,
    process: TracedOperation<String, Value, DownstreamError>,
}

impl DownstreamClient {
    pub fn new(base_url: &str, timeout: Duration, tracer: TracerHandle) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::internal_error(format!("Failed to build HTTP client: {}", e)))?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let calculate = {
            let http = http.clone();
            let url = format!("{}/api/calculate", base_url);
            TracedOperation::new("downstream.calculate", tracer.clone(), move |ctx: RequestContext, number: i64| {
                post_json(http.clone(), url.clone(), ctx, json!({ "number": number }))
            })
            .with_attributes(|_, number: &i64| {
                vec![
                    KeyValue::new("peer.service", "downstream"),
                    KeyValue::new("method", "calculate"),
                    KeyValue::new("input.number", *number),
                ]
            })
        };

        let process = {
            let url = format!("{}/api/process", base_url);
            TracedOperation::new("downstream.process", tracer, move |ctx: RequestContext, content: String| {
                post_json(http.clone(), url.clone(), ctx, json!({ "content": content }))
            })
            .with_attributes(|_, content: &String| {
                vec![
                    KeyValue::new("peer.service", "downstream"),
                    KeyValue::new("method", "process"),
                    KeyValue::new("input.content", content.clone()),
                ]
            })
        };

        Ok(Self { calculate, process })
    }

    /// Build a client when a base URL is configured.
    pub fn from_config(config: &DownstreamConfig, tracer: TracerHandle) -> ApiResult<Option<Self>> {
        config
            .base_url
            .as_deref()
            .map(|url| Self::new(url, Duration::from_secs(config.timeout_secs), tracer))
            .transpose()
    }

    pub async fn calculate(&self, ctx: &RequestContext, number: i64) -> Result<Value, DownstreamError> {
        let result = self.calculate.call(ctx, number).await;
        record("calculate", result.is_ok());
        result
    }

    pub async fn process(&self, ctx: &RequestContext, content: &str) -> Result<Value, DownstreamError> {
        let result = self.process.call(ctx, content.to_string()).await;
        record("process", result.is_ok());
        result
    }
}

fn record(operation: &str, success: bool) {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_downstream_call(operation, success);
    }
}

async fn post_json(
    http: reqwest::Client,
    url: String,
    ctx: RequestContext,
    body: Value,
) -> Result<Value, DownstreamError> {
    let mut headers = HeaderMap::new();
    TraceContextPropagator::new().inject_context(ctx.otel(), &mut HeaderInjector(&mut headers));

    let response = ctx
        .guard(http.post(&url).headers(headers).json(&body).send())
        .await?
        .map_err(|e| DownstreamError::Transport {
            url: url.clone(),
            reason: e.to_string(),
        })?;

    let envelope: DownstreamResponse = ctx
        .guard(response.json())
        .await?
        .map_err(|e| DownstreamError::Decode {
            url: url.clone(),
            reason: e.to_string(),
        })?;

    if envelope.code != 0 {
        return Err(DownstreamError::Rejected {
            code: envelope.code,
            message: envelope.message,
        });
    }
    Ok(envelope.data)
}
