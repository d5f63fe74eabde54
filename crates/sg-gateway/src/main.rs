//! shellgate gateway daemon
//!
//! Serves browser terminals backed by remote SSH shells.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sg_core::config::{self, GatewayConfig};
use sg_gateway::connection::RusshConnector;
use sg_gateway::{GatewayState, HttpServer};

#[derive(Parser)]
#[command(name = "shellgate")]
#[command(about = "Web-to-SSH terminal gateway")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Session token signing secret (overrides config)
    #[arg(long, env = "SHELLGATE_TOKEN_SECRET", hide_env_values = true)]
    token_secret: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("shellgate starting...");

    // Load configuration
    let mut config: GatewayConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                GatewayConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            GatewayConfig::default()
        }
    };

    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(secret) = args.token_secret {
        config.token_secret = Some(secret);
    }
    let bind_addr = config.bind_address.clone();

    tracing::info!(
        "Grace period {}s, token TTL {}s, serving assets from {:?}",
        config.grace_period.as_secs(),
        config.token_ttl.as_secs(),
        config.static_dir
    );

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    let state = GatewayState::new(config, Arc::new(RusshConnector::new()), cancel.clone())
        .context("Invalid gateway configuration")?;
    let state = Arc::new(state);

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    let server = HttpServer::new(state, cancel);
    server.run(&bind_addr).await?;

    tracing::info!("shellgate shutdown complete");
    Ok(())
}
