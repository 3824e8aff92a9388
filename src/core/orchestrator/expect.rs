// src/core/orchestrator/expect.rs

//! Cluster-wide `global_expect` propagation.
//!
//! A target set on one node travels with its snapshot. Every node adopts the
//! newest target it sees (by request time), applies it locally, and clears
//! its own copy once the target holds locally and every member with data
//! has caught up with it.

use crate::core::cluster::{GlobalExpect, NodeSnapshot, StoreInner};

/// A `global_expect` value with the time it was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamped {
    pub value: GlobalExpect,
    pub at: u64,
}

/// Selects the target tracked in a snapshot: the node's own or one service's.
pub trait ExpectScope {
    fn get(&self, snapshot: &NodeSnapshot) -> Option<Stamped>;
}

/// The node-level target.
pub struct NodeScope;

impl ExpectScope for NodeScope {
    fn get(&self, snapshot: &NodeSnapshot) -> Option<Stamped> {
        Some(Stamped {
            value: snapshot.monitor.global_expect,
            at: snapshot.monitor.global_expect_updated,
        })
    }
}

/// The target of one service. Nodes without an instance do not track it.
pub struct ServiceScope<'a>(pub &'a str);

impl ExpectScope for ServiceScope<'_> {
    fn get(&self, snapshot: &NodeSnapshot) -> Option<Stamped> {
        snapshot.services.get(self.0).map(|instance| Stamped {
            value: instance.global_expect,
            at: instance.global_expect_updated,
        })
    }
}

fn member_snapshots<'a>(inner: &'a StoreInner) -> impl Iterator<Item = &'a NodeSnapshot> + 'a {
    inner
        .members
        .iter()
        .filter_map(move |member| inner.nodes.get(member))
}

/// Returns the newest set target among members, if any.
pub fn newest(inner: &StoreInner, scope: &impl ExpectScope) -> Option<Stamped> {
    member_snapshots(inner)
        .filter_map(|snapshot| scope.get(snapshot))
        .filter(|stamped| stamped.value != GlobalExpect::Unset)
        .max_by_key(|stamped| stamped.at)
}

/// Returns the target to adopt locally: one strictly newer than the local
/// node's current request time.
pub fn to_adopt(inner: &StoreInner, me: &str, scope: &impl ExpectScope) -> Option<Stamped> {
    let newest = newest(inner, scope)?;
    let local_at = inner
        .nodes
        .get(me)
        .and_then(|snapshot| scope.get(snapshot))
        .map(|stamped| stamped.at)
        .unwrap_or(0);
    (newest.at > local_at).then_some(newest)
}

/// True if every member tracking the target has seen a request at least as new as `at`.
pub fn adopted_everywhere(inner: &StoreInner, scope: &impl ExpectScope, at: u64) -> bool {
    member_snapshots(inner)
        .filter_map(|snapshot| scope.get(snapshot))
        .all(|stamped| stamped.at >= at)
}
