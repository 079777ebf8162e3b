//! Axum middleware layers applied to the router.
//!
//! Includes request tracing, timeout enforcement, response compression and
//! permissive CORS. Failures raised by the layers themselves (timeout, panic)
//! are rewritten into the same `{"error": ...}` body the handlers produce.

use std::any::Any;

use axum::{
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::{CryptoResponse, ErrorResponse};
use common::ServiceError;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tracing::error;

/// CORS policy: any origin may call the operation endpoints.
///
/// The service authenticates nothing itself; access control belongs to the
/// network boundary in front of it.
pub fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

/// A [`ServiceError`] as a complete HTTP response.
pub fn error_response(err: &ServiceError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(CryptoResponse::Error(ErrorResponse::from(err)))).into_response()
}

/// Replace the empty 408 from `TimeoutLayer` with a `deadline_exceeded` body.
pub async fn timeout_body(response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT {
        return error_response(&ServiceError::DeadlineExceeded);
    }
    response
}

/// Response for a handler that panicked.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_default();
    error!(panic = %detail, "handler panicked");
    error_response(&ServiceError::Internal("unexpected failure".into()))
}
