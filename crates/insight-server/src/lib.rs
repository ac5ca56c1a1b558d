//! Insight Server - HTTP surface over the task service
//!
//! Exposes the live notification stream, task polling and submission of
//! registered work kinds through `warp` filters.

pub mod auth;
pub mod error;
pub mod routes;

pub use auth::{StaticTokenResolver, SubscriberResolver};
pub use error::{handle_rejection, ApiError};
pub use routes::{routes, AppState};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
