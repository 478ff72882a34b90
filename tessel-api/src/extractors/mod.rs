//! Custom extractors for the user routes.
//!
//! `Ctx` hands a handler the request context installed by the
//! observability middleware. `ApiJson<T>` is `axum::Json<T>` with
//! rejections rendered as the API envelope.

mod context;
mod json;

pub use context::Ctx;
pub use json::ApiJson;
