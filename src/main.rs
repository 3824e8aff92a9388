// src/main.rs

//! The main entry point for the hagent node agent.

use anyhow::{Context, Result};
use hagent::config::Config;
use hagent::core::join::join_cluster;
use hagent::server;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

const DEFAULT_CONFIG_PATH: &str = "hagent.toml";

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("hagent version {VERSION}");
        return Ok(());
    }

    let config_path = PathBuf::from(
        flag_value(&args, "--config")
            .unwrap_or(DEFAULT_CONFIG_PATH),
    );

    // The agent cannot run without a valid configuration.
    let mut config = match Config::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!(
                "Failed to load configuration from \"{}\": {e:#}",
                config_path.display()
            );
            std::process::exit(1);
        }
    };

    let initial_log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    // --join <host:port>: one-shot membership request, then exit.
    if let Some(peer) = args.iter().position(|arg| arg == "--join").map(|i| args.get(i + 1)) {
        let Some(peer) = peer else {
            eprintln!("--join flag requires a <host:port> value");
            std::process::exit(1);
        };
        join_cluster(&mut config, &config_path, peer)
            .await
            .with_context(|| format!("Failed to join the cluster through {peer}"))?;
        info!("Configuration saved to {}.", config_path.display());
        return Ok(());
    }

    if let Err(e) = server::run(config, Some(config_path), Some(Arc::new(reload_handle))).await {
        error!("Agent runtime error: {:#}", e);
        return Err(e);
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}
