//! Request context extractor.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tessel_core::RequestContext;

use crate::error::ApiError;

/// The request's [`RequestContext`], carrying its deadline, cancellation
/// and server span.
///
/// Only available on routes behind the observability middleware.
#[derive(Debug, Clone)]
pub struct Ctx(pub RequestContext);

#[async_trait]
impl<S> FromRequestParts<S> for Ctx
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .map(Ctx)
            .ok_or_else(|| ApiError::internal_error("Request context missing"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn test_ctx_reads_extension() -> Result<(), String> {
        let (mut parts, _) = Request::new(()).into_parts();
        let (ctx, _cancel) = RequestContext::background().with_cancellation();
        parts.extensions.insert(ctx);

        let Ctx(found) = Ctx::from_request_parts(&mut parts, &())
            .await
            .map_err(|e| e.message)?;
        assert!(!found.is_cancelled());
        Ok(())
    }

    #[tokio::test]
    async fn test_ctx_missing_is_internal_error() {
        let (mut parts, _) = Request::new(()).into_parts();
        let err = Ctx::from_request_parts(&mut parts, &()).await.err();
        assert!(matches!(err, Some(e) if e.status_code().is_server_error()));
    }
}
