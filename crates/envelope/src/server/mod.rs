//! Axum HTTP adapter, routing, and middleware.
//!
//! # Responsibilities
//! - Define the Axum router with all routes and shared middleware.
//! - Turn request bodies into [`common::protocol::CryptoRequest`]s and
//!   [`common::protocol::CryptoResponse`]s into status code + JSON.
//! - Inject shared application state (`AppState`) into handlers.

pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
