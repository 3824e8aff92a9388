// src/server/initialization.rs

//! Builds the agent state and binds the RPC listener.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::state::{AgentState, LogReloadHandle};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Initializes all agent components before starting the main loop.
pub async fn setup(
    config: Config,
    config_path: Option<PathBuf>,
    log_reload_handle: Option<Arc<LogReloadHandle>>,
) -> Result<ServerContext> {
    log_startup_info(&config);

    let (host, port) = (config.listener.host.clone(), config.listener.port);
    let state = AgentState::initialize(config, config_path, log_reload_handle)
        .context("Failed to initialize the agent state")?;

    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind the RPC listener on {host}:{port}"))?;
    info!("hagent listening on {}:{}", host, port);

    Ok(ServerContext {
        shutdown_tx: state.shutdown_tx.clone(),
        state,
        listener,
        background_tasks: JoinSet::new(),
    })
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    info!(
        "Node {} in cluster {} ({} member(s): {}).",
        config.node.name,
        config.cluster.name,
        config.cluster.nodes.len(),
        config.cluster.nodes.join(" ")
    );
    info!(
        "{} service(s) configured. State directory: {}.",
        config.services.len(),
        config.var_dir.display()
    );
    if config.cluster.secret.is_none() {
        warn!("No cluster secret is configured. Gossip and node-to-node requests are unauthenticated.");
    }
    if config.listener.operator_token.is_none() {
        warn!("No operator token is configured. Operator endpoints are open to anyone who can reach the listener.");
    }
    if config.cluster.quorum > 0 {
        info!("Quorum set to {} node(s).", config.cluster.quorum);
    }
}
