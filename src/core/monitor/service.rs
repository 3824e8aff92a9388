// src/core/monitor/service.rs

use super::MonitorOutcome;
use crate::core::cluster::{ClusterStore, GlobalExpect, LocalExpect, ServiceStatus, now_ms};
use crate::core::errors::AgentError;
use crate::core::freeze::FreezeGate;
use crate::core::orchestrator::{MonitorWake, Services};
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// A `service_monitor` request. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceMonitorRequest {
    pub path: String,
    pub local_expect: Option<String>,
    pub global_expect: Option<String>,
}

/// The service-scoped counterpart of [`super::NodeMonitor`].
#[derive(Debug, Clone)]
pub struct ServiceMonitor {
    store: Arc<ClusterStore>,
    wake: Arc<MonitorWake>,
    services: Arc<Services>,
    var_dir: PathBuf,
}

impl ServiceMonitor {
    pub fn new(
        store: Arc<ClusterStore>,
        wake: Arc<MonitorWake>,
        services: Arc<Services>,
        var_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            wake,
            services,
            var_dir,
        }
    }

    fn is_satisfied(&self, path: &str, value: GlobalExpect) -> bool {
        let (current, up_anywhere) = self.store.read(|inner| {
            let current = inner
                .nodes
                .get(self.store.my_name())
                .and_then(|local| local.services.get(path))
                .map(|instance| instance.global_expect)
                .unwrap_or_default();
            let up_anywhere = inner
                .members
                .iter()
                .filter_map(|m| inner.nodes.get(m))
                .any(|snapshot| snapshot.service_up(path));
            (current, up_anywhere)
        });
        if current == value {
            return true;
        }
        if current != GlobalExpect::Unset {
            return false;
        }
        let frozen = FreezeGate::service(&self.var_dir, path)
            .frozen(true)
            .is_some();
        match value {
            GlobalExpect::Frozen => frozen,
            GlobalExpect::Thawed => !frozen,
            GlobalExpect::Started => up_anywhere,
            GlobalExpect::Stopped => !up_anywhere,
            GlobalExpect::Unset => false,
        }
    }

    pub fn set(&self, request: ServiceMonitorRequest) -> Result<MonitorOutcome, AgentError> {
        let path = request.path.as_str();
        if !self.services.contains_key(path) {
            return Err(AgentError::UnknownService(path.to_string()));
        }

        let local_expect = request
            .local_expect
            .as_deref()
            .map(|s| {
                LocalExpect::from_str(s).map_err(|_| {
                    AgentError::InvalidRequest(format!(
                        "invalid local_expect '{s}'. Expected started, shutdown or unset"
                    ))
                })
            })
            .transpose()?;

        let mut satisfied = None;
        let global_expect = match request.global_expect.as_deref() {
            Some(requested) => {
                let value = match GlobalExpect::from_str(requested) {
                    Ok(GlobalExpect::Unset) | Err(_) => {
                        return Err(AgentError::InvalidRequest(format!(
                            "invalid service global_expect '{requested}'"
                        )));
                    }
                    Ok(v) => v,
                };
                if self.is_satisfied(path, value) {
                    satisfied = Some(format!("{path} global_expect is already {requested}"));
                    None
                } else {
                    Some(value)
                }
            }
            None => None,
        };

        if global_expect.is_none() && local_expect.is_none() {
            return Ok(MonitorOutcome::AlreadySatisfied(
                satisfied.unwrap_or_else(|| "nothing to change".to_string()),
            ));
        }

        self.store.update_local(|local| {
            let instance = local.services.entry(path.to_string()).or_default();
            if let Some(value) = global_expect {
                instance.global_expect = value;
                instance.global_expect_updated = now_ms();
            }
            if let Some(value) = local_expect {
                instance.local_expect = value;
                instance.restarts = 0;
                // An explicit request is an operator retry.
                if matches!(
                    instance.status,
                    ServiceStatus::StartFailed | ServiceStatus::StopFailed
                ) {
                    instance.status = ServiceStatus::Idle;
                }
            }
        });
        info!(
            "{}: monitor set: local_expect={:?} global_expect={:?}",
            path, local_expect, global_expect
        );
        self.wake.wake("service_monitor", true);
        Ok(MonitorOutcome::Applied)
    }
}
