//! Quai CPU Miner Binary
//!
//! Usage:
//!   quai-miner --config config.toml 0 1
//!   quai-miner --proxy --proxy-url 127.0.0.1:3333
//!
//! Log verbosity follows `RUST_LOG` (default `info`). Prometheus metrics are
//! served on `127.0.0.1:<23000 + 100 * region + zone>`.

#![allow(missing_docs)]

mod args;

use args::MinerArgs;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use quai_consensus::{Blake3Engine, EngineConfig};
use quai_miner::Miner;
use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();

    let args = MinerArgs::parse();
    let config = args.load_config()?;
    let location = config.location()?;

    let metrics_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, location.diagnostics_port()));
    match PrometheusBuilder::new().with_http_listener(metrics_addr).install() {
        Ok(()) => info!(target: "quai::cli", addr = %metrics_addr, "Serving metrics"),
        Err(err) => warn!(target: "quai::cli", addr = %metrics_addr, %err, "Metrics endpoint disabled"),
    }

    let engine_config = EngineConfig::with_threads(config.policy.threads);
    info!(
        target: "quai::cli",
        %location,
        threads = engine_config.threads,
        proxy = config.proxy,
        "Starting Quai CPU miner"
    );
    let engine = Arc::new(Blake3Engine::new(engine_config));

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!(target: "quai::cli", "Received Ctrl-C, shutting down");
                on_signal.cancel();
            }
            Err(err) => warn!(target: "quai::cli", %err, "Cannot listen for Ctrl-C"),
        }
    });

    Miner::new(config, engine).run(shutdown).await?;
    Ok(())
}
