// src/core/orchestrator/placement.rs

//! Pure decision logic of the orchestration loop: which action, if any, a
//! service instance needs on this node given the current cluster view.

use crate::core::cluster::{
    GlobalExpect, LocalExpect, NodeSnapshot, NodeStatus, ServiceMonitorState, ServiceStatus,
    StoreInner,
};
use crate::core::resource::{Orchestrate, Service};
use tracing::debug;

/// What the loop should do about one service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Idle,
    /// Start on this node as the placement leader.
    Start,
    /// Start again after the instance fell down while expected up.
    Restart,
    Stop,
    /// A pending shutdown found the instance already down.
    ShutdownDone,
    /// The restart budget is spent.
    GiveUp,
}

/// A read-only view of everything a decision depends on.
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    pub me: &'a str,
    pub inner: &'a StoreInner,
    pub now_ms: u64,
    pub peer_timeout_ms: u64,
    pub max_restarts: u32,
    pub node_frozen: bool,
}

impl<'a> PlanContext<'a> {
    fn local(&self) -> Option<&'a NodeSnapshot> {
        self.inner.nodes.get(self.me)
    }

    fn is_member(&self, node: &str) -> bool {
        self.inner.members.iter().any(|m| m == node)
    }

    /// The local node is always fresh. A peer is fresh if its snapshot was
    /// ingested within the peer timeout.
    pub fn is_fresh(&self, node: &str) -> bool {
        if node == self.me {
            return true;
        }
        self.inner.nodes.get(node).is_some_and(|snapshot| {
            self.now_ms.saturating_sub(snapshot.updated_at) <= self.peer_timeout_ms
        })
    }

    /// Candidate nodes of a service that are cluster members, in placement order.
    fn candidates(&self, service: &Service) -> Vec<String> {
        service
            .nodes
            .iter()
            .filter(|node| self.is_member(node))
            .cloned()
            .collect()
    }

    /// Returns the first candidate able to host the service right now.
    pub fn placement_leader(&self, service: &Service) -> Option<String> {
        self.candidates(service)
            .into_iter()
            .find(|node| {
                if !self.is_fresh(node) {
                    return false;
                }
                let Some(snapshot) = self.inner.nodes.get(node.as_str()) else {
                    return false;
                };
                if snapshot.monitor.status != NodeStatus::Idle || snapshot.monitor.frozen.is_some()
                {
                    return false;
                }
                let instance = snapshot.services.get(&service.path);
                !instance.is_some_and(|i| i.status == ServiceStatus::StartFailed || i.frozen.is_some())
            })
    }

    /// Returns the candidates whose state is unknown: missing or stale.
    pub fn unknown_candidates(&self, service: &Service) -> Vec<String> {
        self.candidates(service)
            .into_iter()
            .filter(|node| !self.is_fresh(node))
            .collect()
    }

    /// True if any member reports the service up or starting.
    pub fn up_anywhere(&self, path: &str) -> bool {
        self.inner
            .nodes
            .iter()
            .filter(|(node, _)| self.is_member(node))
            .any(|(_, snapshot)| {
                snapshot.service_up(path)
                    || snapshot
                        .services
                        .get(path)
                        .is_some_and(|i| i.status == ServiceStatus::Starting)
            })
    }

    fn should_start_here(&self, service: &Service) -> bool {
        let unknown = self.unknown_candidates(service);
        if !unknown.is_empty() {
            debug!(
                "{}: not starting, state of {:?} is unknown.",
                service.path, unknown
            );
            return false;
        }
        if self.up_anywhere(&service.path) {
            return false;
        }
        self.placement_leader(service).as_deref() == Some(self.me)
    }
}

/// Decides what the instance of `service` on the local node needs.
///
/// An explicit shutdown is honored even when frozen. Every other action is
/// suppressed by a node or service freeze.
pub fn plan_service(ctx: &PlanContext<'_>, service: &Service) -> Decision {
    let Some(local) = ctx.local() else {
        return Decision::Idle;
    };
    let default_instance = ServiceMonitorState::default();
    let instance = local.services.get(&service.path).unwrap_or(&default_instance);

    if instance.local_expect == LocalExpect::Shutdown {
        if instance.avail.is_down() {
            return Decision::ShutdownDone;
        }
        if instance.status == ServiceStatus::StopFailed {
            return Decision::Idle;
        }
        return Decision::Stop;
    }

    if ctx.node_frozen || instance.frozen.is_some() {
        return Decision::Idle;
    }
    if instance.status == ServiceStatus::StopFailed {
        return Decision::Idle;
    }
    if instance.global_expect == GlobalExpect::Stopped {
        return if instance.avail.is_up() {
            Decision::Stop
        } else {
            Decision::Idle
        };
    }
    if local.monitor.status != NodeStatus::Idle || instance.status == ServiceStatus::StartFailed {
        return Decision::Idle;
    }

    if instance.local_expect == LocalExpect::Started && instance.avail.is_down() {
        if instance.restarts >= ctx.max_restarts {
            return Decision::GiveUp;
        }
        return Decision::Restart;
    }

    let wants_up =
        service.orchestrate == Orchestrate::Ha || instance.global_expect == GlobalExpect::Started;
    if wants_up && instance.avail.is_down() && ctx.should_start_here(service) {
        return Decision::Start;
    }
    Decision::Idle
}
