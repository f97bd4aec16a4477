use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod batcher;
mod config;
mod database;
mod monitoring;
mod orchestrator;
mod pool;

/// Checks a list of websites periodically and records the results.
#[derive(Debug, Parser)]
#[command(name = "sitewatch", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    let database = libsql::Builder::new_local(&config.database.path)
        .build()
        .await
        .with_context(|| format!("opening database at {}", config.database.path))?;
    let manager = pool::ConnectionManager::new(database);
    let pool = pool::ConnectionPool::builder(manager)
        .max_size(config.database.max_connections)
        .build()
        .context("building connection pool")?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("termination signal received, shutting down");
            shutdown.cancel();
        }
    });

    orchestrator::Orchestrator::start(config, pool, shutdown).await
}

/// Completes when the process is asked to stop.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(error = %error, "failed to install interrupt handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(error) => {
                error!(error = %error, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}
