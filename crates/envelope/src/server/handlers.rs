//! Axum request handlers for all service endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use common::protocol::{CryptoRequest, CryptoResponse, ErrorResponse, HealthResponse};
use tracing::warn;

use super::middleware::error_response;
use super::state::AppState;

/// `POST /v1/operations`: body carries its own `operation` tag.
pub async fn execute(State(state): State<AppState>, body: Bytes) -> Response {
    respond(&state, None, &body).await
}

/// `POST /v1/operations/:operation`: operation taken from the path; a tag in
/// the body, if any, must agree.
pub async fn execute_named(
    State(state): State<AppState>,
    Path(operation): Path<String>,
    body: Bytes,
) -> Response {
    respond(&state, Some(&operation), &body).await
}

/// The body is taken as raw bytes so that malformed JSON still gets the
/// standard `validation_error` envelope rather than Axum's plain-text rejection.
async fn respond(state: &AppState, operation: Option<&str>, body: &[u8]) -> Response {
    let outcome = match CryptoRequest::from_json(body, operation) {
        Ok(request) => state.operations.execute(request).await,
        Err(e) => {
            warn!(code = e.code(), error = %e, "request rejected");
            Err(e)
        }
    };

    match outcome {
        Ok(output) => (StatusCode::OK, Json(CryptoResponse::Result(output))).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET /health`: liveness check.
///
/// Does not call the provider; a provider outage shows up on the operation
/// endpoints as `key_provider_unavailable`.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        provider: state.operations.provider_name().into(),
    })
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(CryptoResponse::Error(err)))
}
