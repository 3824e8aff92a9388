// src/server/supervisor.rs

//! Serves the RPC listener and supervises the background tasks until the
//! agent is asked to stop.

use super::api;
use super::context::ServerContext;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs until SIGINT, SIGTERM, a `daemon_shutdown` request or the failure
/// of any background task, then stops every task.
pub async fn run(mut ctx: ServerContext) -> Result<()> {
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

    let metrics_enabled = ctx.state.config.lock().await.metrics.enabled;
    let app = api::router(ctx.state.clone(), metrics_enabled);
    let mut listener_shutdown = ctx.shutdown_tx.subscribe();
    let listener = ctx.listener;
    ctx.background_tasks.spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                listener_shutdown.recv().await.ok();
                info!("RPC listener shutting down.");
            })
            .await?;
        Ok(())
    });

    let mut shutdown_rx = ctx.shutdown_tx.subscribe();
    let mut failure = None;
    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown requested through the RPC listener.");
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => {
                        error!("CRITICAL: Background task failed: {}. Shutting down.", e);
                        failure = Some(e);
                        break;
                    }
                    Err(e) => {
                        error!("CRITICAL: Background task panicked: {e:?}. Shutting down.");
                        failure = Some(anyhow::anyhow!("background task panicked: {e}"));
                        break;
                    }
                }
            }
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    // Fails only when every receiver is gone, i.e. all tasks already ended.
    let _ = ctx.shutdown_tx.send(());

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
        ctx.background_tasks.shutdown().await;
    }
    info!("Agent shutdown complete.");

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
