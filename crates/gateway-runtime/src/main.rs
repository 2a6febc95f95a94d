//! # Route Gateway Runtime
//!
//! Entry point for the route gateway.
//!
//! ## Startup Sequence
//!
//! 1. Parse flags and environment, load and validate configuration
//! 2. Initialise logging
//! 3. Build the backend adapter (socket channel or process handoff)
//! 4. Bind the HTTP listener and serve
//! 5. On SIGINT/SIGTERM: stop accepting, drain the backend, exit

mod cli;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use route_gateway::{BackendMode, GatewayService};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_json)?;

    let config = cli.load_config().context("loading configuration")?;

    info!("===========================================");
    info!("  Route Gateway v{}", route_gateway::VERSION);
    info!("===========================================");
    match config.backend.mode {
        BackendMode::Socket => info!(
            backend = %config.backend.address,
            discipline = ?config.backend.discipline,
            "Using engine socket"
        ),
        BackendMode::Process => info!(
            program = %config.process.program.display(),
            output = ?config.process.output,
            "Using engine process"
        ),
    }

    let addr = config.http_addr();
    let service = GatewayService::connect(config).context("starting gateway")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    service.serve(listener, shutdown_signal()).await?;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
