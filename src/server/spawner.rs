// src/server/spawner.rs

//! Spawns the long-running background tasks of the agent.

use super::context::ServerContext;
use crate::core::cluster::{GossipSettings, MembershipSink, UdpGossip};
use crate::core::tasks::{peer_watchdog::PeerWatchdogTask, status_checker::StatusCheckerTask};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Spawns every background task into the context's `JoinSet`.
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let state = ctx.state.clone();

    // Gossip first: a bind failure must abort startup before anything runs.
    let settings = GossipSettings::from(&*state.config.lock().await);
    let membership = MembershipSink {
        config: state.config.clone(),
        path: state.config_path.clone(),
    };
    let gossip = UdpGossip::bind(
        state.store.clone(),
        state.wake.clone(),
        settings,
        Some(membership),
    )
    .await
    .context("Failed to start the gossip transport")?;
    let gossip = Arc::new(gossip);
    let shutdown_rx = ctx.shutdown_tx.subscribe();
    ctx.background_tasks.spawn(async move {
        gossip.run(shutdown_rx).await?;
        Ok(())
    });

    let orchestrator = state.orchestrator.clone();
    let shutdown_rx = ctx.shutdown_tx.subscribe();
    ctx.background_tasks.spawn(async move {
        orchestrator.run(shutdown_rx).await?;
        Ok(())
    });

    let status_checker = StatusCheckerTask::new(state.clone());
    let shutdown_rx = ctx.shutdown_tx.subscribe();
    ctx.background_tasks.spawn(async move {
        status_checker.run(shutdown_rx).await;
        Ok(())
    });

    let peer_watchdog = PeerWatchdogTask::new(state.clone());
    let shutdown_rx = ctx.shutdown_tx.subscribe();
    ctx.background_tasks.spawn(async move {
        peer_watchdog.run(shutdown_rx).await;
        Ok(())
    });

    info!("All background tasks spawned.");
    Ok(())
}
