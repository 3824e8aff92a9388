// src/core/monitor/node.rs

use super::MonitorOutcome;
use crate::core::cluster::{ClusterStore, GlobalExpect, NodeStatus, now_ms};
use crate::core::errors::AgentError;
use crate::core::freeze::FreezeGate;
use crate::core::orchestrator::MonitorWake;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// A `node_monitor` request. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeMonitorRequest {
    pub local_expect: Option<String>,
    pub global_expect: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NodeMonitor {
    store: Arc<ClusterStore>,
    wake: Arc<MonitorWake>,
    gate: FreezeGate,
}

impl NodeMonitor {
    pub fn new(store: Arc<ClusterStore>, wake: Arc<MonitorWake>, gate: FreezeGate) -> Self {
        Self { store, wake, gate }
    }

    /// Validates `requested` against the current node target and frozen state.
    fn check_global_expect(&self, requested: &str) -> Result<Option<GlobalExpect>, AgentError> {
        let value = match GlobalExpect::from_str(requested) {
            Ok(v @ (GlobalExpect::Frozen | GlobalExpect::Thawed)) => v,
            _ => {
                return Err(AgentError::InvalidRequest(format!(
                    "invalid node global_expect '{requested}'. Expected frozen or thawed"
                )));
            }
        };
        let current = self.store.local().monitor.global_expect;
        let frozen = self.gate.node_frozen().is_some();
        let satisfied = current == value
            || (current == GlobalExpect::Unset
                && match value {
                    GlobalExpect::Frozen => frozen,
                    _ => !frozen,
                });
        Ok((!satisfied).then_some(value))
    }

    /// Applies a node monitor request.
    ///
    /// Every field is validated before anything is written. A `global_expect`
    /// that is already in effect yields [`MonitorOutcome::AlreadySatisfied`]
    /// when it is the only field requested.
    pub fn set(&self, request: NodeMonitorRequest) -> Result<MonitorOutcome, AgentError> {
        let status = request
            .status
            .as_deref()
            .map(|s| {
                NodeStatus::from_str(s)
                    .map_err(|_| AgentError::InvalidRequest(format!("invalid node status '{s}'")))
            })
            .transpose()?;

        let mut satisfied = None;
        let global_expect = match request.global_expect.as_deref() {
            Some(requested) => {
                let checked = self.check_global_expect(requested)?;
                if checked.is_none() {
                    satisfied = Some(format!("node global_expect is already {requested}"));
                }
                checked
            }
            None => None,
        };

        if global_expect.is_none() && status.is_none() && request.local_expect.is_none() {
            return Ok(MonitorOutcome::AlreadySatisfied(
                satisfied.unwrap_or_else(|| "nothing to change".to_string()),
            ));
        }

        self.store.update_local(|local| {
            let now = now_ms();
            if let Some(value) = global_expect {
                local.monitor.global_expect = value;
                local.monitor.global_expect_updated = now;
            }
            if let Some(status) = status {
                local.monitor.status = status;
                local.monitor.status_updated = now;
            }
            if let Some(hint) = &request.local_expect {
                local.monitor.local_expect = (!hint.is_empty()).then(|| hint.clone());
            }
        });
        info!(
            "Node monitor set: local_expect={:?} global_expect={:?} status={:?}",
            request.local_expect, global_expect, status
        );
        self.wake.wake("node_monitor", true);
        Ok(MonitorOutcome::Applied)
    }
}
