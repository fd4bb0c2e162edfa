//! Binary witness node.
//!
//! ```text
//! fabric-witness [--env-file .env] [--config fabric.toml] [--port 8091]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fabric_common::{load_env_file, Ed25519Signer, FabricConfig};
use fabric_witness::{build_router, Ledger, WitnessAppState, WitnessNode, WitnessSettings};

#[derive(Debug, Parser)]
#[command(name = "fabric-witness", about = "Witness node for the quorum fabric")]
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
    let mut settings = WitnessSettings::from_env().context("invalid witness settings")?;
    if let Some(port) = args.port {
        settings.port = port;
    }

    let ledger_path = settings.ledger_path();
    let ledger = Ledger::open(&ledger_path, settings.mirror_path.clone())
        .with_context(|| format!("failed to open ledger {}", ledger_path.display()))?;

    let track = settings.security_track.unwrap_or(fabric.security_track);
    let mut node = WitnessNode::new(settings.witness_id.clone(), settings.region.clone(), ledger, fabric)
        .with_hasher(settings.hasher.hasher());
    if let Some(key) = &settings.signing_key {
        let signer = Ed25519Signer::from_keypair_hex(key).context("invalid WITNESS_SIGNING_KEY")?;
        node = node.with_signer(Box::new(signer));
    }
    let node = Arc::new(node.with_security_track(track));

    info!(
        witness_id = %settings.witness_id,
        region = %settings.region,
        security_track = %track,
        ledger = %ledger_path.display(),
        order_counter = node.ledger().current_order(),
        "witness starting"
    );

    let app = build_router(WitnessAppState::new(node));

    let addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(listen_addr = %addr, "witness listening");

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

    info!(witness_id = %settings.witness_id, "witness shutdown complete");
    Ok(())
}
