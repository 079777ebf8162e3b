//! Error taxonomy shared by every adapter.

use thiserror::Error;

/// Top-level service error type.
///
/// Variants map to a stable machine-readable code and an HTTP status:
/// - [`ServiceError::Validation`] → `validation_error`, 400
/// - [`ServiceError::UnsupportedAlgorithm`] → `unsupported_algorithm`, 400
/// - [`ServiceError::Integrity`] → `integrity_error`, 422
/// - [`ServiceError::KeyProvider`] → `key_provider_error`, 502
/// - [`ServiceError::KeyProviderUnavailable`] → `key_provider_unavailable`, 503
/// - [`ServiceError::DeadlineExceeded`] → `deadline_exceeded`, 504
/// - [`ServiceError::Internal`] → `internal_error`, 500
///
/// The `String` payloads are fixed summaries chosen by this crate. Raw provider
/// error text is logged, never carried here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Missing or malformed request fields, bad base64/hex, wrong digest length.
    #[error("validation error: {0}")]
    Validation(String),

    /// The selected provider or key cannot perform the requested algorithm.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Authentication tag mismatch on decrypt.
    #[error("integrity check failed")]
    Integrity,

    /// The key provider refused the operation (key not found, access denied, ...).
    #[error("key provider error: {0}")]
    KeyProvider(String),

    /// The key provider could not be reached or is throttling.
    #[error("key provider unavailable: {0}")]
    KeyProviderUnavailable(String),

    /// The operation did not complete before its deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// An unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable error kind exposed on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation_error",
            ServiceError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            ServiceError::Integrity => "integrity_error",
            ServiceError::KeyProvider(_) => "key_provider_error",
            ServiceError::KeyProviderUnavailable(_) => "key_provider_unavailable",
            ServiceError::DeadlineExceeded => "deadline_exceeded",
            ServiceError::Internal(_) => "internal_error",
        }
    }

    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 400,
            ServiceError::UnsupportedAlgorithm(_) => 400,
            ServiceError::Integrity => 422,
            ServiceError::KeyProvider(_) => 502,
            ServiceError::KeyProviderUnavailable(_) => 503,
            ServiceError::DeadlineExceeded => 504,
            ServiceError::Internal(_) => 500,
        }
    }

    /// Whether a caller may retry the same request with backoff.
    ///
    /// Validation and integrity failures are deterministic and never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::KeyProviderUnavailable(_) | ServiceError::DeadlineExceeded
        )
    }
}
