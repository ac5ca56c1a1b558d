//! HTTP error mapping
//!
//! Handlers reject with [`ApiError`]; [`handle_rejection`] turns every
//! rejection into a JSON body `{ "error": ..., "code": ... }`.

use insight_core::SubmitError;
use serde::Serialize;
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

/// Errors surfaced to HTTP clients
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or unknown token
    #[error("authentication required")]
    Unauthorized,

    /// Task id unknown or malformed
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// No work registered for the kind
    #[error("unknown task kind: {0}")]
    UnknownKind(String),

    /// Service no longer accepts work
    #[error("service is shutting down")]
    ShuttingDown,
}

impl ApiError {
    /// HTTP status for this error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::TaskNotFound(_) | ApiError::UnknownKind(_) => StatusCode::NOT_FOUND,
            ApiError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Machine-readable code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::TaskNotFound(_) => "task_not_found",
            ApiError::UnknownKind(_) => "unknown_kind",
            ApiError::ShuttingDown => "shutting_down",
        }
    }
}

impl warp::reject::Reject for ApiError {}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::ShuttingDown => ApiError::ShuttingDown,
            SubmitError::UnknownKind(kind) => ApiError::UnknownKind(kind),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

/// Render any rejection as a JSON error
///
/// # Errors
/// Never fails; the `Result` is what `recover` expects.
pub async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let (status, error, code) = if let Some(err) = rejection.find::<ApiError>() {
        (err.status(), err.to_string(), err.code())
    } else if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string(), "not_found")
    } else if let Some(err) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, err.to_string(), "bad_request")
    } else if let Some(err) = rejection.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, err.to_string(), "bad_request")
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload too large".to_string(),
            "payload_too_large",
        )
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "method not allowed".to_string(),
            "method_not_allowed",
        )
    } else {
        tracing::error!(?rejection, "unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal error".to_string(),
            "internal",
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody { error, code }),
        status,
    ))
}
