//! `envelope` binary entry point.
//!
//! Startup sequence:
//! 1. Parse the command line.
//! 2. Load and validate [`Config`] from environment variables.
//! 3. Initialise the telemetry pipeline (tracing + optional OTLP).
//! 4. Build the key provider selected by `PROVIDER`.
//! 5. Either serve the HTTP adapter or execute one request from the CLI.

mod cli;
mod config;
mod crypto;
mod ops;
mod provider;
mod server;
mod telemetry;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use cli::{Cli, Command};
use config::Config;
use ops::Operations;
use server::state::AppState;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // -----------------------------------------------------------------------
    // 1. Command line
    // -----------------------------------------------------------------------
    let cli = Cli::parse();

    // -----------------------------------------------------------------------
    // 2. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 3. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        provider = cfg.provider.as_str(),
        "envelope starting"
    );

    // -----------------------------------------------------------------------
    // 4. Key provider
    // -----------------------------------------------------------------------
    let provider = provider::from_config(&cfg).await?;
    let operations = Operations::new(provider, cfg.default_keys(), cfg.provider_timeout());

    // -----------------------------------------------------------------------
    // 5. Serve or run once
    // -----------------------------------------------------------------------
    let code = match cli.command {
        Command::Serve { port } => {
            let router = server::router::build(AppState::new(operations), cfg.request_timeout());

            let addr: std::net::SocketAddr = ([0, 0, 0, 0], port.unwrap_or(cfg.http_port)).into();
            info!(addr = %addr, "listening");

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    // A failed signal handler only means we cannot shut down gracefully.
                    let _ = tokio::signal::ctrl_c().await;
                    info!("shutdown requested");
                })
                .await?;
            ExitCode::SUCCESS
        }
        Command::Run { operation, request } => {
            let body = cli::read_request(request).await?;
            let response = cli::run_once(&operations, operation.as_deref(), &body).await;
            println!("{}", serde_json::to_string(&response)?);
            if response.is_error() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
    };

    telemetry::shutdown();
    Ok(code)
}
