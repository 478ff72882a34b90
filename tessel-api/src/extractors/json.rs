//! JSON body extractor with envelope rejections.

use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use tessel_core::RequestContext;

use crate::error::ApiError;

/// `Json<T>` whose rejection is an `invalid_input` [`ApiError`] carrying
/// the request's trace id.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let ctx = req.extensions().get::<RequestContext>().cloned();
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => {
                let err = ApiError::invalid_input(rejection.body_text());
                Err(match &ctx {
                    Some(ctx) => err.with_trace(ctx),
                    None => err,
                })
            }
        }
    }
}
