//! Binary gateway.
//!
//! ```text
//! fabric-gateway [--env-file .env] [--config fabric.toml] [--port 8080]
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fabric_common::{load_env_file, FabricConfig};
use fabric_gateway::{build_router, spawn_sweeper, AppState, GatewaySettings};

#[derive(Debug, Parser)]
#[command(name = "fabric-gateway", about = "Quorum gateway for the witness fabric")]
struct Args {
    /// `.env` file to load before reading settings.
    #[arg(long, env = "FABRIC_ENV_FILE")]
    env_file: Option<PathBuf>,

    /// TOML file with the fabric configuration.
    #[arg(long, env = "FABRIC_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Listen port, overrides `PORT`.
    #[arg(long)]
    port: Option<u16>,
}

fn load_fabric_config(path: Option<&PathBuf>) -> anyhow::Result<FabricConfig> {
    match path {
        Some(path) => {
            let mut cfg = FabricConfig::load_from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            cfg.apply_overrides(|var| std::env::var(var).ok())?;
            cfg.validate()?;
            Ok(cfg)
        }
        None => FabricConfig::from_env().context("invalid fabric configuration"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if let Some(env_file) = &args.env_file {
        std::env::set_var("FABRIC_ENV_FILE", env_file);
    }
    load_env_file();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let fabric = load_fabric_config(args.config.as_ref())?;
    let mut settings = GatewaySettings::from_env().context("invalid gateway settings")?;
    if let Some(port) = args.port {
        settings.port = port;
    }

    info!(
        witnesses = fabric.witnesses.len(),
        quorum_size = fabric.quorum_size,
        max_skew_ms = fabric.max_timestamp_skew_ms,
        security_track = %fabric.security_track,
        "gateway configuration loaded"
    );

    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let state = AppState::new(fabric, http, settings.client_options(), settings.idempotency_ttl());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = spawn_sweeper(state.idempotency.clone(), settings.sweep_interval(), shutdown_rx);

    let app = build_router(state);

    let addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(listen_addr = %addr, "gateway listening");

    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        error!(error = %e, "idempotency sweeper failed");
    }

    info!("gateway shutdown complete");
    Ok(())
}
