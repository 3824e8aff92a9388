// src/core/monitor/drain.rs

//! The drain/shutdown composite: freeze the node, ask every running service
//! instance to shut down, and optionally wait for the orchestration loop to
//! finish the job.

use super::MonitorOutcome;
use crate::core::cluster::{ClusterStore, LocalExpect, NodeStatus, now_ms};
use crate::core::errors::AgentError;
use crate::core::freeze::FreezeGate;
use crate::core::orchestrator::MonitorWake;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Wait bound when the caller asks to wait without giving a time.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(300);
/// Safety-net polling interval of the wait loop.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct Drainer {
    store: Arc<ClusterStore>,
    wake: Arc<MonitorWake>,
    gate: FreezeGate,
}

impl Drainer {
    pub fn new(store: Arc<ClusterStore>, wake: Arc<MonitorWake>, gate: FreezeGate) -> Self {
        Self { store, wake, gate }
    }

    /// Paths of local instances that still have a shutdown pending.
    pub fn pending_shutdowns(&self) -> Vec<String> {
        self.store
            .local()
            .services
            .into_iter()
            .filter(|(_, instance)| instance.local_expect == LocalExpect::Shutdown)
            .map(|(path, _)| path)
            .collect()
    }

    /// Starts a drain with the node status `target` (draining or shutting).
    ///
    /// If the node already is in `target`, the in-flight drain is not
    /// restarted. With `wait`, blocks until no local instance has a shutdown
    /// pending, or fails with a timeout after `time`. A timeout does not
    /// roll anything back.
    pub async fn drain(
        &self,
        target: NodeStatus,
        wait: bool,
        time: Option<Duration>,
    ) -> Result<MonitorOutcome, AgentError> {
        if !matches!(target, NodeStatus::Draining | NodeStatus::Shutting) {
            return Err(AgentError::InvalidRequest(format!(
                "{target} is not a drain status"
            )));
        }

        let already = self.store.local().monitor.status == target;
        if already {
            info!("Node is already {}. Not restarting the drain.", target);
        } else {
            self.start(target);
        }

        if wait {
            self.wait_drained(time.unwrap_or(DEFAULT_DRAIN_TIMEOUT))
                .await?;
        }
        if already {
            Ok(MonitorOutcome::AlreadySatisfied(format!(
                "node is already {target}"
            )))
        } else {
            Ok(MonitorOutcome::Applied)
        }
    }

    fn start(&self, target: NodeStatus) {
        // Freeze first so no automatic action starts behind our back.
        self.gate.node_freeze_logged();
        let frozen = self.gate.node_frozen();

        let marked = self.store.update_local(|local| {
            local.monitor.status = target;
            local.monitor.status_updated = now_ms();
            local.monitor.frozen = frozen;
            let mut marked = Vec::new();
            for (path, instance) in local.services.iter_mut() {
                if !instance.avail.is_down() {
                    instance.local_expect = LocalExpect::Shutdown;
                    marked.push(path.clone());
                }
            }
            marked
        });
        info!(
            "Node is now {}. Shutting down {} service(s): {:?}",
            target,
            marked.len(),
            marked
        );
        self.wake.wake(&format!("node {target}"), true);
    }

    async fn wait_drained(&self, time: Duration) -> Result<(), AgentError> {
        let deadline = Instant::now() + time;
        let mut changes = self.store.subscribe();
        loop {
            let pending = self.pending_shutdowns();
            if pending.is_empty() {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                warn!("Drain wait timed out. Still shutting down: {:?}", pending);
                return Err(AgentError::Timeout(format!(
                    "drain did not complete within {time:?}, pending: {}",
                    pending.join(", ")
                )));
            }
            ClusterStore::wait_change(&mut changes, DRAIN_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}
