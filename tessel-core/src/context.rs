//! Request context: trace identity, deadline and cancellation
//!
//! A `RequestContext` travels with every collaborator call. It carries the
//! OpenTelemetry context (active span and baggage), an optional deadline and
//! a cancellation signal. Work that must outlive the request, such as cache
//! population, runs on `detached(..)`, which keeps the trace identity but
//! never the request's cancellation or deadline.

use crate::Interrupted;
use opentelemetry::baggage::{Baggage, BaggageExt};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

// ============================================================================
// CANCELLATION
// ============================================================================

/// Owner side of a request's cancellation signal.
///
/// Cancels explicitly with `cancel()`, or implicitly when dropped.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

// ============================================================================
// REQUEST CONTEXT
// ============================================================================

#[derive(Debug, Clone)]
pub struct RequestContext {
    otel: Context,
    deadline: Option<Instant>,
    cancel: watch::Receiver<bool>,
    /// Present when the context owns its own signal, which then never fires.
    _owner: Option<Arc<watch::Sender<bool>>>,
}

impl RequestContext {
    /// A root context: empty trace, no deadline, never cancelled.
    pub fn background() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            otel: Context::new(),
            deadline: None,
            cancel: rx,
            _owner: Some(Arc::new(tx)),
        }
    }

    /// Derive a context with a fresh cancellation signal owned by the
    /// returned handle. Trace context and deadline are kept.
    pub fn with_cancellation(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            otel: self.otel.clone(),
            deadline: self.deadline,
            cancel: rx,
            _owner: None,
        };
        (ctx, CancelHandle { tx })
    }

    /// Derive a context whose deadline is at most `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    /// Replace the OpenTelemetry context, keeping deadline and cancellation.
    pub fn with_otel(&self, otel: Context) -> Self {
        Self {
            otel,
            ..self.clone()
        }
    }

    /// A context for work that outlives the current request.
    ///
    /// Copies the span context and baggage only. The result has its own
    /// never-firing cancellation signal and a deadline of `timeout` from now,
    /// regardless of this context's state.
    pub fn detached(&self, timeout: Duration) -> Self {
        let mut otel = Context::new();
        let span_context = self.otel.span().span_context().clone();
        if span_context.is_valid() {
            otel = otel.with_remote_span_context(span_context);
        }
        let baggage: Baggage = self
            .otel
            .baggage()
            .iter()
            .map(|(k, (v, m))| (k.clone(), (v.clone(), m.clone())))
            .collect();
        otel = otel.with_baggage(baggage);

        let (tx, rx) = watch::channel(false);
        Self {
            otel,
            deadline: Some(Instant::now() + timeout),
            cancel: rx,
            _owner: Some(Arc::new(tx)),
        }
    }

    pub fn otel(&self) -> &Context {
        &self.otel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// A dropped `CancelHandle` counts as cancellation.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow() || self.cancel.has_changed().is_err()
    }

    /// Resolves once the context is cancelled. Pends forever otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        loop {
            let fired = *rx.borrow_and_update();
            if fired {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Run `fut` under this context's deadline and cancellation.
    ///
    /// Fails fast without polling `fut` if the context is already cancelled
    /// or past its deadline.
    pub async fn guard<F, T>(&self, fut: F) -> Result<T, Interrupted>
    where
        F: Future<Output = T>,
    {
        if self.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        if self.is_expired() {
            return Err(Interrupted::DeadlineExceeded);
        }

        let deadline = self.deadline;
        let expiry = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            out = fut => Ok(out),
            _ = self.cancelled() => Err(Interrupted::Cancelled),
            _ = expiry => Err(Interrupted::DeadlineExceeded),
        }
    }

    /// Hex trace id of the active span, if any.
    pub fn trace_id(&self) -> Option<String> {
        let span = self.otel.span();
        let span_context = span.span_context();
        span_context
            .is_valid()
            .then(|| span_context.trace_id().to_string())
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}
