//! Call instrumentation
//!
//! `TracedOperation` wraps a unary fallible async operation so that every
//! call opens a named span, attaches caller-supplied attributes and records
//! failures. The span is closed on every exit path: success, error, panic
//! and the caller dropping the future.

use crate::RequestContext;
use futures::future::{BoxFuture, FutureExt};
use opentelemetry::global::BoxedTracer;
use opentelemetry::trace::{noop::NoopTracer, Span, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

// ============================================================================
// TRACER HANDLE
// ============================================================================

/// Shared tracer used by every `TracedOperation` of a service.
///
/// A disabled handle turns instrumentation off entirely: calls run the inner
/// operation directly and attribute extractors are never evaluated.
#[derive(Clone)]
pub struct TracerHandle {
    tracer: Arc<BoxedTracer>,
    enabled: bool,
}

impl TracerHandle {
    pub fn new<T>(tracer: T) -> Self
    where
        T: Tracer + Send + Sync + 'static,
        T::Span: Send + Sync + 'static,
    {
        Self {
            tracer: Arc::new(BoxedTracer::new(Box::new(tracer))),
            enabled: true,
        }
    }

    pub fn noop() -> Self {
        Self {
            tracer: Arc::new(BoxedTracer::new(Box::new(NoopTracer::new()))),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn tracer(&self) -> &BoxedTracer {
        &self.tracer
    }
}

impl fmt::Debug for TracerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracerHandle")
            .field("enabled", &self.enabled)
            .finish()
    }
}

// ============================================================================
// TRACED OPERATION
// ============================================================================

type OpFn<A, R, E> =
    Arc<dyn Fn(RequestContext, A) -> BoxFuture<'static, Result<R, E>> + Send + Sync>;

type AttributeFn<A> = Arc<dyn Fn(&RequestContext, &A) -> Vec<KeyValue> + Send + Sync>;

/// A named operation whose calls are wrapped in spans.
///
/// Built once at wiring time and cloned cheaply. Calling a traced operation
/// from inside another one yields a parent/child span chain, because the
/// inner operation receives a context whose active span is the outer span.
pub struct TracedOperation<A, R, E> {
    name: Cow<'static, str>,
    op: OpFn<A, R, E>,
    attributes: Option<AttributeFn<A>>,
    tracer: TracerHandle,
}

impl<A, R, E> TracedOperation<A, R, E>
where
    A: Send + 'static,
    R: Send + 'static,
    E: std::error::Error + Send + 'static,
{
    pub fn new<F, Fut>(name: impl Into<Cow<'static, str>>, tracer: TracerHandle, f: F) -> Self
    where
        F: Fn(RequestContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let op: OpFn<A, R, E> = Arc::new(move |ctx: RequestContext, arg: A| f(ctx, arg).boxed());
        Self {
            name: name.into(),
            op,
            attributes: None,
            tracer,
        }
    }

    /// Attach span attributes derived from the call's context and argument.
    pub fn with_attributes<G>(mut self, extract: G) -> Self
    where
        G: Fn(&RequestContext, &A) -> Vec<KeyValue> + Send + Sync + 'static,
    {
        self.attributes = Some(Arc::new(extract));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the operation under a span parented to the span in `ctx`.
    ///
    /// The result is returned unchanged. Panics are resumed after the span
    /// is marked as failed and ended.
    pub async fn call(&self, ctx: &RequestContext, arg: A) -> Result<R, E> {
        if !self.tracer.is_enabled() {
            return (self.op)(ctx.clone(), arg).await;
        }

        let mut span = self
            .tracer
            .tracer()
            .start_with_context(self.name.clone(), ctx.otel());
        if let Some(extract) = &self.attributes {
            span.set_attributes(extract(ctx, &arg));
        }

        let otel = ctx.otel().with_span(span);
        let guard = EndOnDrop(otel.clone());
        let child = ctx.with_otel(otel);

        let outcome = AssertUnwindSafe((self.op)(child, arg))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                let span = guard.0.span();
                span.record_error(&err);
                span.set_status(Status::error(err.to_string()));
                Err(err)
            }
            Err(panic) => {
                guard.0.span().set_status(Status::error("panicked"));
                drop(guard);
                resume_unwind(panic)
            }
        }
    }
}

impl<A, R, E> Clone for TracedOperation<A, R, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            op: Arc::clone(&self.op),
            attributes: self.attributes.clone(),
            tracer: self.tracer.clone(),
        }
    }
}

impl<A, R, E> fmt::Debug for TracedOperation<A, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedOperation")
            .field("name", &self.name)
            .field("has_attributes", &self.attributes.is_some())
            .field("tracer", &self.tracer)
            .finish()
    }
}

/// Ends the span carried by the context when dropped.
struct EndOnDrop(Context);

impl Drop for EndOnDrop {
    fn drop(&mut self) {
        self.0.span().end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{SpanKind, TracerProvider};
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[derive(Debug, thiserror::Error, PartialEq)]
    #[error("boom: {0}")]
    struct Boom(u32);

    fn capture() -> (TracerHandle, InMemorySpanExporter, SdkTracerProvider) {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let handle = TracerHandle::new(provider.tracer("instrument-test"));
        (handle, exporter, provider)
    }

    #[tokio::test]
    async fn test_success_emits_one_span_with_attributes() {
        let (tracer, exporter, _provider) = capture();
        let double = TracedOperation::new("double", tracer, |_ctx, n: u32| async move {
            Ok::<_, Boom>(n * 2)
        })
        .with_attributes(|_ctx, n| vec![KeyValue::new("input", i64::from(*n))]);

        let out = double.call(&RequestContext::background(), 21).await;
        assert_eq!(out, Ok(42));

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "double");
        assert_eq!(spans[0].span_kind, SpanKind::Internal);
        assert!(spans[0]
            .attributes
            .iter()
            .any(|kv| kv.key.as_str() == "input" && kv.value == opentelemetry::Value::I64(21)));
        assert_eq!(spans[0].status, Status::Unset);
    }

    #[tokio::test]
    async fn test_error_is_returned_unchanged_and_recorded() {
        let (tracer, exporter, _provider) = capture();
        let fail = TracedOperation::new("fail", tracer, |_ctx, n: u32| async move {
            Err::<u32, _>(Boom(n))
        });

        let out = fail.call(&RequestContext::background(), 3).await;
        assert_eq!(out, Err(Boom(3)));

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert!(matches!(spans[0].status, Status::Error { .. }));
        assert!(spans[0].events.events.iter().any(|e| e.name == "exception"));
    }

    #[tokio::test]
    async fn test_panic_ends_span_and_resumes() {
        let (tracer, exporter, _provider) = capture();
        let explode = TracedOperation::new("explode", tracer, |_ctx, _n: u32| async move {
            if true {
                panic!("inner panic");
            }
            Ok::<u32, Boom>(0)
        });

        let ctx = RequestContext::background();
        let caught = AssertUnwindSafe(explode.call(&ctx, 1)).catch_unwind().await;
        assert!(caught.is_err());

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, Status::error("panicked"));
    }

    #[tokio::test]
    async fn test_dropped_call_still_ends_span() {
        let (tracer, exporter, _provider) = capture();
        let hang = TracedOperation::new("hang", tracer, |_ctx, _n: u32| async move {
            std::future::pending::<()>().await;
            Ok::<u32, Boom>(0)
        });

        let ctx = RequestContext::background();
        let timed = tokio::time::timeout(Duration::from_millis(10), hang.call(&ctx, 1)).await;
        assert!(timed.is_err());

        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_nested_operations_form_parent_child_chain() {
        let (tracer, exporter, _provider) = capture();
        let inner = TracedOperation::new("inner", tracer.clone(), |_ctx, n: u32| async move {
            Ok::<_, Boom>(n + 1)
        });
        let outer = TracedOperation::new("outer", tracer, move |ctx: RequestContext, n: u32| {
            let inner = inner.clone();
            async move { inner.call(&ctx, n).await }
        });

        assert_eq!(outer.call(&RequestContext::background(), 1).await, Ok(2));

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);
        let inner_span = spans.iter().find(|s| s.name == "inner").unwrap();
        let outer_span = spans.iter().find(|s| s.name == "outer").unwrap();
        assert_eq!(
            inner_span.span_context.trace_id(),
            outer_span.span_context.trace_id()
        );
        assert_eq!(inner_span.parent_span_id, outer_span.span_context.span_id());
    }

    #[tokio::test]
    async fn test_disabled_tracer_skips_span_and_extractor() {
        let extracted = Arc::new(AtomicBool::new(false));
        let seen = extracted.clone();
        let op = TracedOperation::new("quiet", TracerHandle::noop(), |ctx: RequestContext, n: u32| {
            async move {
                assert!(ctx.trace_id().is_none());
                Ok::<_, Boom>(n)
            }
        })
        .with_attributes(move |_ctx, _n| {
            seen.store(true, Ordering::SeqCst);
            Vec::new()
        });

        assert_eq!(op.call(&RequestContext::background(), 5).await, Ok(5));
        assert!(!extracted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_child_context_carries_operation_span() {
        let (tracer, _exporter, _provider) = capture();
        let probe = TracedOperation::new("probe", tracer, |ctx: RequestContext, _n: u32| {
            async move { Ok::<_, Boom>(ctx.trace_id()) }
        });

        let trace_id = probe.call(&RequestContext::background(), 0).await.unwrap();
        assert!(trace_id.is_some());
    }
}
