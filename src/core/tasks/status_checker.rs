// src/core/tasks/status_checker.rs

//! A background task that periodically evaluates every service's resource
//! status and mirrors it into the local snapshot.

use crate::core::cluster::now_ms;
use crate::core::resource::ResourceStatus;
use crate::core::state::AgentState;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

pub struct StatusCheckerTask {
    state: Arc<AgentState>,
}

impl StatusCheckerTask {
    pub fn new(state: Arc<AgentState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let period = self.state.config.lock().await.monitor.status_interval;
        info!("Status checker task started (interval {:?}).", period);
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let changed = self.check_once().await;
                    if !changed.is_empty() {
                        self.state.wake.wake("status", true);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Status checker task shutting down.");
                    return;
                }
            }
        }
    }

    /// Evaluates every idle service once. Returns the paths whose status changed.
    pub async fn check_once(&self) -> Vec<String> {
        let mut changed = Vec::new();
        for (path, service) in self.state.services.iter() {
            // A worker reports the status itself when its action ends.
            if self.state.orchestrator.in_flight(path) {
                continue;
            }
            let avail = service.status(false).await;
            let updated = self.state.store.try_update_local(|local| {
                let instance = local.services.entry(path.clone()).or_default();
                if instance.avail == avail {
                    return None;
                }
                let previous = instance.avail;
                instance.avail = avail;
                instance.updated_at = now_ms();
                Some(previous)
            });
            if let Some(previous) = updated {
                log_transition(path, previous, avail);
                changed.push(path.clone());
            }
        }
        changed
    }
}

fn log_transition(path: &str, previous: ResourceStatus, current: ResourceStatus) {
    if previous == ResourceStatus::NA {
        debug!("{}: status {}.", path, current);
    } else {
        info!("{}: status changed from {} to {}.", path, previous, current);
    }
}
