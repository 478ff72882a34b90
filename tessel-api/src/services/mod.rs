//! Service Layer
//!
//! Business logic between the HTTP routes and the read-through store.

mod user_service;

pub use user_service::UserService;
