// src/server/mod.rs

use crate::config::Config;
use crate::core::state::LogReloadHandle;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

pub mod api;
mod context;
mod initialization;
mod spawner;
mod supervisor;

pub use context::ServerContext;

/// The main agent startup function, orchestrating all setup phases.
pub async fn run(
    config: Config,
    config_path: Option<PathBuf>,
    log_reload_handle: Option<Arc<LogReloadHandle>>,
) -> Result<()> {
    // 1. Initialize the agent state and bind the RPC listener.
    let mut server_context =
        initialization::setup(config, config_path, log_reload_handle).await?;

    // 2. Spawn gossip, the orchestration loop and the scheduler tasks.
    spawner::spawn_all(&mut server_context).await?;

    // 3. Serve RPC requests until a signal, a shutdown request or a task failure.
    supervisor::run(server_context).await
}
