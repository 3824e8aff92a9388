// src/core/cluster/snapshot.rs

//! The per-node state snapshot replicated by gossip, and the monitor state
//! types it carries.

use crate::core::resource::ResourceStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Helper to get the current system time in milliseconds since the UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A tentative hold on a named distributed lock.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct LockClaim {
    pub name: String,
    /// Fresh per acquisition attempt.
    pub id: String,
    pub requester: String,
    pub requested_at: u64,
}

impl LockClaim {
    /// Returns true if `self` takes precedence over `other` for the same lock name.
    /// The older request wins; ties go to the lower requester name, then the lower id.
    pub fn wins_over(&self, other: &LockClaim) -> bool {
        (self.requested_at, &self.requester, &self.id)
            < (other.requested_at, &other.requester, &other.id)
    }
}

/// The phase a node is in.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Idle,
    Maintenance,
    Upgrade,
    Draining,
    Shutting,
}

/// A cluster-wide target. Nodes only accept `frozen` and `thawed`; services
/// also accept `started` and `stopped`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GlobalExpect {
    #[default]
    Unset,
    Frozen,
    Thawed,
    Started,
    Stopped,
}

/// A node-local target for a service instance.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LocalExpect {
    #[default]
    Unset,
    Started,
    Shutdown,
}

/// The phase of a service instance as seen by the orchestration loop.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum ServiceStatus {
    #[default]
    #[serde(rename = "idle")]
    #[strum(serialize = "idle")]
    Idle,
    #[serde(rename = "starting")]
    #[strum(serialize = "starting")]
    Starting,
    #[serde(rename = "stopping")]
    #[strum(serialize = "stopping")]
    Stopping,
    #[serde(rename = "start failed")]
    #[strum(serialize = "start failed")]
    StartFailed,
    #[serde(rename = "stop failed")]
    #[strum(serialize = "stop failed")]
    StopFailed,
}

/// Node-level monitor state.
#[derive(
    Debug, Clone, Default, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct NodeMonitorState {
    pub status: NodeStatus,
    /// Free-form hint, e.g. `shutdown`.
    pub local_expect: Option<String>,
    pub global_expect: GlobalExpect,
    /// When the current `global_expect` was requested, on the requesting node's clock.
    pub global_expect_updated: u64,
    /// Derived from the freeze gate on each refresh. Frozen-since in ms.
    pub frozen: Option<u64>,
    pub status_updated: u64,
}

/// Monitor state of one service instance on one node.
#[derive(
    Debug, Clone, Default, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct ServiceMonitorState {
    pub status: ServiceStatus,
    pub local_expect: LocalExpect,
    pub global_expect: GlobalExpect,
    pub global_expect_updated: u64,
    /// Last observed aggregate resource status.
    pub avail: ResourceStatus,
    pub frozen: Option<u64>,
    pub restarts: u32,
    pub updated_at: u64,
}

/// The full state one node publishes about itself.
#[derive(
    Debug, Clone, Default, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct NodeSnapshot {
    /// This node's view of every cluster lock, keyed by lock name.
    pub locks: BTreeMap<String, LockClaim>,
    pub monitor: NodeMonitorState,
    /// Keyed by service path.
    pub services: BTreeMap<String, ServiceMonitorState>,
    /// The membership list as known by the author.
    pub members: Vec<String>,
    pub config_digest: String,
    /// Stamped by the author when the snapshot is published.
    pub published_at: u64,
    /// Last local refresh, or last ingestion for peer entries (local clock).
    pub updated_at: u64,
}

impl NodeSnapshot {
    /// Returns true if this snapshot holds the exact `(name, id)` claim.
    pub fn has_claim(&self, name: &str, id: &str) -> bool {
        self.locks.get(name).is_some_and(|claim| claim.id == id)
    }

    /// Returns true if the named service instance is up on this node.
    pub fn service_up(&self, path: &str) -> bool {
        self.services.get(path).is_some_and(|svc| svc.avail.is_up())
    }
}
