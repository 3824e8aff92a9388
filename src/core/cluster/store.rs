// src/core/cluster/store.rs

//! The Cluster Data Store: a single mutex-guarded map from node name to that
//! node's last-known snapshot, plus the membership list.
//!
//! The local node's entry is written only through the `*_local` methods.
//! Peer entries are written only by [`ClusterStore::ingest`], which replaces
//! the whole entry.

use super::lock::merge_peer_locks;
use super::snapshot::{NodeSnapshot, now_ms};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

/// The guarded contents of the store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreInner {
    /// The membership list, in join order.
    pub members: Vec<String>,
    /// Last-known snapshot of every node that has data, keyed by node name.
    pub nodes: BTreeMap<String, NodeSnapshot>,
}

impl StoreInner {
    /// Returns the membership list sorted by node name.
    pub fn sorted_members(&self) -> Vec<String> {
        let mut members = self.members.clone();
        members.sort();
        members
    }
}

/// What changed as a result of ingesting a peer snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Members learned from the peer's member list.
    pub new_members: Vec<String>,
    /// Whether the local lock view changed while merging the peer's claims.
    pub locks_changed: bool,
}

/// The process-wide cluster data store, shared by reference between every component.
#[derive(Debug)]
pub struct ClusterStore {
    my_name: String,
    inner: Mutex<StoreInner>,
    /// Bumped on every mutation. Waiters use it instead of sleeping blindly.
    version_tx: watch::Sender<u64>,
    /// Signals the gossip transmitter that the local snapshot changed.
    local_changed: Notify,
}

impl ClusterStore {
    /// Creates a store for `my_name`. The local node is added to the
    /// membership list if it is not already listed.
    pub fn new(my_name: impl Into<String>, members: Vec<String>) -> Self {
        let my_name = my_name.into();
        let mut members = members;
        if !members.contains(&my_name) {
            members.push(my_name.clone());
        }
        let mut nodes = BTreeMap::new();
        let local = NodeSnapshot {
            members: members.clone(),
            updated_at: now_ms(),
            ..Default::default()
        };
        nodes.insert(my_name.clone(), local);
        let (version_tx, _) = watch::channel(0);
        Self {
            my_name,
            inner: Mutex::new(StoreInner { members, nodes }),
            version_tx,
            local_changed: Notify::new(),
        }
    }

    pub fn my_name(&self) -> &str {
        &self.my_name
    }

    /// Returns the membership list in join order.
    pub fn members(&self) -> Vec<String> {
        self.inner.lock().members.clone()
    }

    /// Returns the membership list sorted by node name.
    pub fn sorted_members(&self) -> Vec<String> {
        self.inner.lock().sorted_members()
    }

    pub fn is_member(&self, name: &str) -> bool {
        self.inner.lock().members.iter().any(|m| m == name)
    }

    /// Appends a node to the membership list. Returns `false` if it was already a member.
    pub fn add_member(&self, name: &str) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.members.iter().any(|m| m == name) {
                return false;
            }
            inner.members.push(name.to_string());
            let members = inner.members.clone();
            if let Some(local) = inner.nodes.get_mut(&self.my_name) {
                local.members = members;
                local.updated_at = now_ms();
            }
        }
        info!("Node {} added to the cluster membership.", name);
        self.bump(true);
        true
    }

    /// Returns a copy of the local snapshot.
    pub fn local(&self) -> NodeSnapshot {
        self.inner
            .lock()
            .nodes
            .get(&self.my_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the local snapshot stamped for publication. The stamp is taken
    /// under the store lock so it orders correctly against lock claims.
    pub fn outbound(&self) -> NodeSnapshot {
        let inner = self.inner.lock();
        let mut snapshot = inner.nodes.get(&self.my_name).cloned().unwrap_or_default();
        snapshot.published_at = now_ms();
        snapshot
    }

    /// Returns a copy of a node's last-known snapshot, if any.
    pub fn get(&self, name: &str) -> Option<NodeSnapshot> {
        self.inner.lock().nodes.get(name).cloned()
    }

    /// Runs a read-only closure against a consistent view of the whole store.
    pub fn read<R>(&self, f: impl FnOnce(&StoreInner) -> R) -> R {
        f(&self.inner.lock())
    }

    /// Returns a full copy of the store.
    pub fn dump(&self) -> StoreInner {
        self.inner.lock().clone()
    }

    /// Mutates the local snapshot. Always counts as a local change.
    pub fn update_local<R>(&self, f: impl FnOnce(&mut NodeSnapshot) -> R) -> R {
        let result = {
            let mut inner = self.inner.lock();
            let local = inner.nodes.entry(self.my_name.clone()).or_default();
            let result = f(local);
            local.updated_at = now_ms();
            result
        };
        self.bump(true);
        result
    }

    /// Mutates the local snapshot. Counts as a local change only if the closure returns `Some`.
    pub fn try_update_local<R>(&self, f: impl FnOnce(&mut NodeSnapshot) -> Option<R>) -> Option<R> {
        let result = {
            let mut inner = self.inner.lock();
            let local = inner.nodes.entry(self.my_name.clone()).or_default();
            let result = f(local);
            if result.is_some() {
                local.updated_at = now_ms();
            }
            result
        };
        if result.is_some() {
            self.bump(true);
        }
        result
    }

    /// Replaces a peer's entry wholesale with a received snapshot.
    ///
    /// Members listed by a known member are learned, and the peer's lock
    /// claims are merged into the local lock view under the same lock.
    pub fn ingest(&self, peer: &str, mut snapshot: NodeSnapshot) -> IngestOutcome {
        if peer == self.my_name {
            warn!("Ignoring a gossiped snapshot claiming to be from this node.");
            return IngestOutcome::default();
        }
        snapshot.updated_at = now_ms();

        let outcome = {
            let mut inner = self.inner.lock();
            let mut outcome = IngestOutcome::default();
            let peer_is_member = inner.members.iter().any(|m| m == peer);
            if peer_is_member {
                for member in &snapshot.members {
                    if !inner.members.contains(member) {
                        inner.members.push(member.clone());
                        outcome.new_members.push(member.clone());
                    }
                }
            }
            inner.nodes.insert(peer.to_string(), snapshot);

            outcome.locks_changed = merge_peer_locks(&mut inner, &self.my_name, peer);
            if outcome.locks_changed || !outcome.new_members.is_empty() {
                let members = inner.members.clone();
                if let Some(local) = inner.nodes.get_mut(&self.my_name) {
                    local.members = members;
                    local.updated_at = now_ms();
                }
            }
            outcome
        };

        for member in &outcome.new_members {
            info!("Learned cluster member {} from {}.", member, peer);
        }
        debug!("Ingested snapshot from {}.", peer);
        let local_changed = outcome.locks_changed || !outcome.new_members.is_empty();
        self.bump(local_changed);
        outcome
    }

    /// Subscribes to store changes. The value is a change counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    /// Waits until the store changes or `max` elapses, whichever comes first.
    pub async fn wait_change(rx: &mut watch::Receiver<u64>, max: Duration) {
        if let Ok(Err(_)) = tokio::time::timeout(max, rx.changed()).await {
            tokio::time::sleep(max).await;
        }
    }

    /// Resolves when the local snapshot changed since the last call.
    pub async fn local_changed(&self) {
        self.local_changed.notified().await
    }

    fn bump(&self, local_changed: bool) {
        self.version_tx.send_modify(|v| *v = v.wrapping_add(1));
        if local_changed {
            self.local_changed.notify_one();
        }
    }
}
