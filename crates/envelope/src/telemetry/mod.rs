//! Structured logging and optional OTLP trace export.
//!
//! # Telemetry invariants
//!
//! - **No plaintext, key material or raw signatures** may appear in any span
//!   attribute or log field. Operation name, provider name, request id, error
//!   code and latency are the only per-request fields.
//! - Logs go to stderr so that `envelope run` keeps stdout for the response.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`), overridden by
//!   `RUST_LOG` when set.

pub mod init;

pub use init::{init_telemetry, shutdown};
