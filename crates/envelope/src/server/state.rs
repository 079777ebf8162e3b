//! Shared application state injected into every Axum handler.

use crate::ops::Operations;

/// Application state shared across all request handlers.
///
/// [`Operations`] is `Arc`-backed, so Axum can clone the state for each
/// request without copying provider clients.
#[derive(Clone)]
pub struct AppState {
    /// The operation handler, holding the injected key provider.
    pub operations: Operations,
}

impl AppState {
    pub fn new(operations: Operations) -> Self {
        Self { operations }
    }
}
