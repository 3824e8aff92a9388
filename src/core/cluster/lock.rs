// src/core/cluster/lock.rs

//! A distributed advisory lock built on the cluster data store and gossip.
//!
//! A claim is recorded in the local node's lock view and becomes visible to
//! peers with the next gossip round. Peers merge the claims they see into
//! their own views (see [`merge_peer_locks`]), and a claim is accepted only
//! when every member's snapshot shows the identical `(name, id)` pair.
//! There is no leader and no log: a lost gossip round can stall acceptance,
//! which the caller bounds with a timeout.

use super::snapshot::{LockClaim, now_ms};
use super::store::{ClusterStore, StoreInner};
use crate::core::metrics;
use crate::core::orchestrator::MonitorWake;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);
/// Safety-net polling interval between acceptance checks.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Returns true iff every member's snapshot carries the exact `(name, id)` claim.
/// A member without any gossiped data yet blocks acceptance.
pub fn accepted_in(inner: &StoreInner, name: &str, id: &str) -> bool {
    inner.sorted_members().iter().all(|member| {
        inner
            .nodes
            .get(member)
            .is_some_and(|snapshot| snapshot.has_claim(name, id))
    })
}

/// Returns true if the requester's own snapshot, published after the claim
/// was requested, no longer carries it.
fn released_by_requester(inner: &StoreInner, claim: &LockClaim) -> bool {
    inner.nodes.get(&claim.requester).is_some_and(|snapshot| {
        snapshot.published_at > claim.requested_at && !snapshot.has_claim(&claim.name, &claim.id)
    })
}

/// Merges the lock view of `peer` into the local lock view of `me`.
/// Returns true if the local view changed.
pub(crate) fn merge_peer_locks(inner: &mut StoreInner, me: &str, peer: &str) -> bool {
    let Some(peer_snapshot) = inner.nodes.get(peer) else {
        return false;
    };
    let Some(local) = inner.nodes.get(me) else {
        return false;
    };

    let mut to_remove = Vec::new();
    for (name, claim) in &local.locks {
        if claim.requester != me && released_by_requester(inner, claim) {
            to_remove.push(name.clone());
        }
    }

    let mut to_adopt = Vec::new();
    for (name, claim) in &peer_snapshot.locks {
        if claim.requester == me || released_by_requester(inner, claim) {
            continue;
        }
        let current = if to_remove.contains(name) {
            None
        } else {
            local.locks.get(name)
        };
        match current {
            None => to_adopt.push(claim.clone()),
            Some(current) if current.id == claim.id => {}
            Some(current) => {
                if claim.wins_over(current) {
                    to_adopt.push(claim.clone());
                }
            }
        }
    }

    if to_remove.is_empty() && to_adopt.is_empty() {
        return false;
    }
    let Some(local) = inner.nodes.get_mut(me) else {
        return false;
    };
    for name in to_remove {
        debug!("Dropping released lock {} from the local view.", name);
        local.locks.remove(&name);
    }
    for claim in to_adopt {
        debug!(
            "Adopting lock {} claimed by {} (id {}).",
            claim.name, claim.requester, claim.id
        );
        local.locks.insert(claim.name.clone(), claim);
    }
    true
}

/// The Lock Manager. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LockManager {
    store: Arc<ClusterStore>,
    wake: Arc<MonitorWake>,
}

impl LockManager {
    pub fn new(store: Arc<ClusterStore>, wake: Arc<MonitorWake>) -> Self {
        Self { store, wake }
    }

    /// Records a claim in the local lock view. Returns `None` if a claim on
    /// `name` is already present there.
    pub fn claim_local(&self, requester: &str, name: &str) -> Option<String> {
        let id = self.store.try_update_local(|local| {
            if local.locks.contains_key(name) {
                return None;
            }
            let claim = LockClaim {
                name: name.to_string(),
                id: Uuid::new_v4().to_string(),
                requester: requester.to_string(),
                requested_at: now_ms(),
            };
            let id = claim.id.clone();
            local.locks.insert(name.to_string(), claim);
            Some(id)
        })?;
        self.wake.wake("lock", true);
        Some(id)
    }

    /// Read-only predicate: true iff every member agrees on `(name, id)`.
    pub fn accepted(&self, name: &str, lock_id: &str) -> bool {
        self.store.read(|inner| accepted_in(inner, name, lock_id))
    }

    /// Returns true if the local lock view still holds `(name, id)`.
    fn claim_present(&self, name: &str, lock_id: &str) -> bool {
        self.store.local().has_claim(name, lock_id)
    }

    /// Acquires the cluster-wide lock `name` on behalf of `requester`.
    ///
    /// Returns the lock id once every member reflects the claim, or `None`
    /// on timeout or when `requester` is not a cluster member. Never fails.
    pub async fn acquire(
        &self,
        requester: &str,
        name: &str,
        timeout: Option<Duration>,
    ) -> Option<String> {
        if name.is_empty() {
            warn!("Refusing to acquire a lock with an empty name.");
            return None;
        }
        if !self.store.is_member(requester) {
            warn!(
                "Lock {} requested by {}, which is not a cluster member.",
                name, requester
            );
            return None;
        }

        let timeout = timeout.unwrap_or(DEFAULT_ACQUIRE_TIMEOUT);
        let deadline = Instant::now() + timeout;
        let mut changes = self.store.subscribe();
        let mut lock_id: Option<String> = None;
        let mut refused = false;

        loop {
            if lock_id.is_none() {
                match self.claim_local(requester, name) {
                    Some(id) => {
                        debug!("Claimed lock {} locally (id {}).", name, id);
                        refused = false;
                        lock_id = Some(id);
                    }
                    None => {
                        if !refused {
                            info!("Lock {} is already claimed. Waiting.", name);
                            refused = true;
                        }
                    }
                }
            }

            if let Some(id) = lock_id.clone() {
                if !self.claim_present(name, &id) {
                    info!("Claim {} on lock {} was superseded. Retrying.", id, name);
                    lock_id = None;
                    continue;
                }
                if self.accepted(name, &id) {
                    info!("Lock {} acquired (id {}).", name, id);
                    metrics::LOCK_ACQUISITIONS_TOTAL
                        .with_label_values(&["acquired"])
                        .inc();
                    return Some(id);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            ClusterStore::wait_change(&mut changes, LOCK_POLL_INTERVAL.min(deadline - now)).await;
        }

        warn!("Timed out acquiring lock {} after {:?}.", name, timeout);
        metrics::LOCK_ACQUISITIONS_TOTAL
            .with_label_values(&["timeout"])
            .inc();
        if let Some(id) = lock_id {
            self.release(name, &id);
        }
        None
    }

    /// Removes the local claim if and only if its id matches `lock_id`.
    /// Returns true if a claim was removed.
    pub fn release(&self, name: &str, lock_id: &str) -> bool {
        let removed = self
            .store
            .try_update_local(|local| {
                if local.has_claim(name, lock_id) {
                    local.locks.remove(name)
                } else {
                    None
                }
            })
            .is_some();
        if removed {
            debug!("Released lock {} (id {}).", name, lock_id);
            self.wake.wake("lock", true);
        }
        removed
    }

    /// Releases the claim, then waits until no peer snapshot still shows it.
    /// Logs a warning if the wait times out unless `silent` is set. Never fails.
    pub async fn release_and_wait(
        &self,
        name: &str,
        lock_id: &str,
        timeout: Option<Duration>,
        silent: bool,
    ) {
        self.release(name, lock_id);
        let timeout = timeout.unwrap_or(DEFAULT_RELEASE_TIMEOUT);
        let deadline = Instant::now() + timeout;
        let mut changes = self.store.subscribe();
        let me = self.store.my_name().to_string();

        loop {
            let lingering = self.store.read(|inner| {
                inner
                    .nodes
                    .iter()
                    .any(|(node, snapshot)| *node != me && snapshot.has_claim(name, lock_id))
            });
            if !lingering {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                if !silent {
                    warn!(
                        "Timed out waiting for peers to drop lock {} (id {}).",
                        name, lock_id
                    );
                }
                return;
            }
            ClusterStore::wait_change(&mut changes, LOCK_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}
