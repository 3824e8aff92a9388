// src/core/monitor/mod.rs

//! Node and service monitor state machines: validated requests that change
//! the local snapshot and wake the orchestration loop.

pub mod drain;
pub mod node;
pub mod service;

pub use drain::{DEFAULT_DRAIN_TIMEOUT, Drainer};
pub use node::{NodeMonitor, NodeMonitorRequest};
pub use service::{ServiceMonitor, ServiceMonitorRequest};

/// The result of an accepted monitor request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    Applied,
    /// Nothing to do. The request was not applied and nothing was woken.
    AlreadySatisfied(String),
}

impl MonitorOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, MonitorOutcome::Applied)
    }
}
