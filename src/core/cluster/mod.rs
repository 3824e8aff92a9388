// src/core/cluster/mod.rs

//! This module contains the cluster coordination layer: the replicated
//! per-node snapshots, the cluster data store, the distributed lock and the
//! gossip transport.

pub mod gossip;
pub mod lock;
pub mod secure_gossip;
pub mod snapshot;
pub mod store;

// Re-export key types for easier access from other modules.
pub use gossip::{GossipMessage, GossipSettings, GossipTransport, MembershipSink, UdpGossip};
pub use lock::LockManager;
pub use snapshot::{
    GlobalExpect, LocalExpect, LockClaim, NodeMonitorState, NodeSnapshot, NodeStatus,
    ServiceMonitorState, ServiceStatus, now_ms,
};
pub use store::{ClusterStore, IngestOutcome, StoreInner};
