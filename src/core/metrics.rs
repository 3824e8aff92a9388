// src/core/metrics.rs

//! Defines and registers Prometheus metrics for agent monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Gauges ---
    /// A boolean gauge indicating if the node freeze flag is present.
    pub static ref NODE_FROZEN: Gauge =
        register_gauge!("hagent_node_frozen", "Node freeze flag present (1 for true, 0 for false).").unwrap();
    /// The number of peers with fresh gossiped data.
    pub static ref KNOWN_PEERS: Gauge =
        register_gauge!("hagent_known_peers", "Number of peers with fresh gossiped data.").unwrap();
    /// The size of the cluster membership list.
    pub static ref CLUSTER_MEMBERS: Gauge =
        register_gauge!("hagent_cluster_members", "Number of nodes in the cluster membership list.").unwrap();

    // --- Counters ---
    /// Lock acquisitions, labeled by outcome (`acquired` or `timeout`).
    pub static ref LOCK_ACQUISITIONS_TOTAL: CounterVec =
        register_counter_vec!("hagent_lock_acquisitions_total", "Total number of lock acquisition attempts, labeled by outcome.", &["outcome"]).unwrap();
    pub static ref RECONCILE_PASSES_TOTAL: Counter =
        register_counter!("hagent_reconcile_passes_total", "Total number of orchestration passes.").unwrap();
    /// Wake requests folded into an already pending wake.
    pub static ref COALESCED_WAKES_TOTAL: Counter =
        register_counter!("hagent_coalesced_wakes_total", "Total number of wake requests coalesced into a pending wake.").unwrap();
    /// Resource actions, labeled by action and outcome.
    pub static ref RESOURCE_ACTIONS_TOTAL: CounterVec =
        register_counter_vec!("hagent_resource_actions_total", "Total number of service actions, labeled by action and outcome.", &["action", "outcome"]).unwrap();
    pub static ref GOSSIP_MESSAGES_RECEIVED_TOTAL: Counter =
        register_counter!("hagent_gossip_messages_received_total", "Total number of accepted gossip messages.").unwrap();
    pub static ref GOSSIP_MESSAGES_DROPPED_TOTAL: Counter =
        register_counter!("hagent_gossip_messages_dropped_total", "Total number of rejected gossip messages.").unwrap();

    // --- Histograms ---
    /// A histogram of orchestration pass durations.
    pub static ref RECONCILE_LATENCY_SECONDS: Histogram =
        register_histogram!("hagent_reconcile_latency_seconds", "Duration of orchestration passes in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
