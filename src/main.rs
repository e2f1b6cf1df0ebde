//! World ID Verification Relay
//!
//! Accepts World ID proofs from clients, checks them with the World ID
//! verification authority and issues a verification record for every proof
//! the authority accepts.

mod config;
mod error;
mod rate_limiter;
mod recorder;
mod server;
mod types;
mod validator;
mod worldid_client;

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::recorder::LogRecordStore;
use crate::server::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "relay.toml")]
    config: String,

    /// Override the listen address from the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Pick up WORLDCOIN_* and friends from a local .env, if present
    dotenv::dotenv().ok();

    // RUST_LOG wins over --verbose
    let default_filter = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting World ID verification relay");

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            warn!(
                "Failed to load config file {}: {}. Using environment variables.",
                args.config, e
            );
            Config::from_env()?
        }
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    info!(
        app_id = %config.app_id,
        environment = ?config.environment,
        "Configuration loaded successfully"
    );

    let listen_addr = config.listen_addr;
    let window = config.rate_limit_window();
    let prune_every = Duration::from_secs(config.rate_limit_prune_interval_secs.max(1));

    let state = Arc::new(AppState::new(config, Arc::new(LogRecordStore))?);
    let rate_limiter = Arc::clone(&state.rate_limiter);

    info!(
        "Rate limit: {} requests per {} ms (enabled: {})",
        state.config.rate_limit_max_requests,
        state.config.rate_limit_window_ms,
        state.config.rate_limit_enabled
    );

    let (bound_addr, api_server) = warp::serve(server::routes(state)).try_bind_ephemeral(listen_addr)?;
    info!("Verification endpoint listening on http://{}/api/verify-worldid", bound_addr);

    let mut prune_interval = interval(prune_every);

    tokio::select! {
        _ = api_server => {
            error!("HTTP server stopped unexpectedly");
        }
        _ = async {
            loop {
                prune_interval.tick().await;
                rate_limiter.prune(window);
            }
        } => {
            error!("Rate limit pruning loop stopped unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    Ok(())
}
