//! Command-line surface: `envelope serve` and `envelope run`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::protocol::{CryptoRequest, CryptoResponse, ErrorResponse};
use tokio::io::AsyncReadExt;

use crate::ops::Operations;

#[derive(Debug, Parser)]
#[command(
    name = "envelope",
    version,
    about = "Envelope encryption, signing and MAC operations backed by AWS KMS or Azure Key Vault"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the HTTP adapter.
    Serve {
        /// Listen port; overrides HTTP_PORT.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Execute one request and print the JSON response on stdout.
    ///
    /// Exits non-zero when the response is an error.
    Run {
        /// Operation name; lets the request omit its `operation` field.
        #[arg(short, long)]
        operation: Option<String>,
        /// Request JSON. Read from stdin when omitted or `-`.
        request: Option<String>,
    },
}

/// The request body from the argument, or stdin when absent or `-`.
pub async fn read_request(arg: Option<String>) -> Result<String> {
    match arg {
        Some(body) if body != "-" => Ok(body),
        _ => {
            let mut body = String::new();
            tokio::io::stdin()
                .read_to_string(&mut body)
                .await
                .context("failed to read request from stdin")?;
            Ok(body)
        }
    }
}

/// Parse and execute one request. Parse failures become error responses.
pub async fn run_once(operations: &Operations, operation: Option<&str>, body: &str) -> CryptoResponse {
    match CryptoRequest::from_json(body.as_bytes(), operation) {
        Ok(request) => operations.respond(request).await,
        Err(e) => CryptoResponse::Error(ErrorResponse::from(&e)),
    }
}
