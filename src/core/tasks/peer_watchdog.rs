// src/core/tasks/peer_watchdog.rs

//! A background task that reports peers whose gossiped data went stale.
//! Stale peers are "unknown" to placement, never "down".

use crate::core::cluster::now_ms;
use crate::core::metrics;
use crate::core::state::AgentState;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub struct PeerWatchdogTask {
    state: Arc<AgentState>,
    stale: BTreeSet<String>,
}

impl PeerWatchdogTask {
    pub fn new(state: Arc<AgentState>) -> Self {
        Self {
            state,
            stale: BTreeSet::new(),
        }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        let (period, peer_timeout) = {
            let config = self.state.config.lock().await;
            (config.gossip.interval, config.gossip.peer_timeout)
        };
        info!("Peer watchdog task started. Peer timeout: {:?}", peer_timeout);
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.check_once(peer_timeout) {
                        self.state.wake.wake("peer state", true);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Peer watchdog task shutting down.");
                    return;
                }
            }
        }
    }

    /// Recomputes the stale set. Returns true if it changed.
    pub fn check_once(&mut self, peer_timeout: Duration) -> bool {
        let store = &self.state.store;
        let me = store.my_name();
        let now = now_ms();
        let timeout_ms = peer_timeout.as_millis() as u64;

        let (stale, members) = store.read(|inner| {
            let stale: BTreeSet<String> = inner
                .members
                .iter()
                .filter(|member| member.as_str() != me)
                .filter(|member| {
                    inner
                        .nodes
                        .get(member.as_str())
                        .is_none_or(|s| now.saturating_sub(s.updated_at) > timeout_ms)
                })
                .cloned()
                .collect();
            (stale, inner.members.len())
        });

        for peer in stale.difference(&self.stale) {
            warn!("Peer {} is stale. Its state is now unknown.", peer);
        }
        for peer in self.stale.difference(&stale) {
            info!("Peer {} is back.", peer);
        }

        metrics::CLUSTER_MEMBERS.set(members as f64);
        metrics::KNOWN_PEERS.set(members.saturating_sub(1 + stale.len()) as f64);

        let changed = stale != self.stale;
        self.stale = stale;
        changed
    }

    pub fn stale_peers(&self) -> &BTreeSet<String> {
        &self.stale
    }
}
