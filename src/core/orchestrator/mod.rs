// src/core/orchestrator/mod.rs

//! The orchestration loop: a single actor that wakes on explicit signals or a
//! timer, reconciles node and service state against the freeze gate and the
//! cluster view, and hands start/stop actions to worker tasks.
//!
//! Workers never block the loop. They report back by updating the local
//! snapshot and waking the loop again.

pub mod expect;
pub mod placement;
pub mod wake;

pub use placement::{Decision, PlanContext, plan_service};
pub use wake::MonitorWake;

use self::expect::{ExpectScope, NodeScope, ServiceScope, Stamped};
use crate::config::Config;
use crate::core::cluster::{
    ClusterStore, GlobalExpect, LocalExpect, NodeStatus, ServiceStatus, now_ms,
};
use crate::core::errors::AgentError;
use crate::core::freeze::FreezeGate;
use crate::core::metrics;
use crate::core::resource::{Orchestrate, Service};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, interval_at, timeout};
use tracing::{debug, error, info, warn};

/// Managed services keyed by path.
pub type Services = BTreeMap<String, Arc<Service>>;

/// A resource action run by a worker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub interval: Duration,
    pub action_timeout: Duration,
    pub max_restarts: u32,
    pub peer_timeout: Duration,
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.monitor.interval,
            action_timeout: config.monitor.action_timeout,
            max_restarts: config.monitor.max_restarts,
            peer_timeout: config.gossip.peer_timeout,
        }
    }
}

#[derive(Debug)]
pub struct Orchestrator {
    store: Arc<ClusterStore>,
    wake: Arc<MonitorWake>,
    services: Arc<Services>,
    var_dir: PathBuf,
    node_gate: FreezeGate,
    settings: OrchestratorSettings,
    in_flight: DashMap<String, ServiceAction>,
    passes: AtomicU64,
    actions: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        store: Arc<ClusterStore>,
        wake: Arc<MonitorWake>,
        services: Arc<Services>,
        var_dir: PathBuf,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            wake,
            services,
            node_gate: FreezeGate::node(&var_dir),
            var_dir,
            settings,
            in_flight: DashMap::new(),
            passes: AtomicU64::new(0),
            actions: AtomicU64::new(0),
        }
    }

    /// Number of completed reconciliation passes.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Number of start/stop actions handed to workers since startup.
    pub fn actions_spawned(&self) -> u64 {
        self.actions.load(Ordering::Relaxed)
    }

    /// Returns true if a worker is currently running an action on `path`.
    pub fn in_flight(&self, path: &str) -> bool {
        self.in_flight.contains_key(path)
    }

    /// Runs the loop until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), AgentError> {
        let period = self.settings.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        info!("Orchestration loop started (interval {:?}).", period);
        self.reconcile_once();

        loop {
            tokio::select! {
                _ = self.wake.notified() => {
                    let reasons = self.wake.take_reasons();
                    debug!("Orchestration loop woken: {:?}", reasons);
                }
                _ = ticker.tick() => {
                    let reasons = self.wake.take_reasons();
                    if !reasons.is_empty() {
                        debug!("Periodic pass, pending reasons: {:?}", reasons);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Orchestration loop shutting down.");
                    return Ok(());
                }
            }
            self.reconcile_once();
        }
    }

    /// Runs one reconciliation pass. Returns the decisions that led to a
    /// state change or an action.
    pub fn reconcile_once(self: &Arc<Self>) -> Vec<(String, Decision)> {
        let _timer = metrics::RECONCILE_LATENCY_SECONDS.start_timer();

        self.refresh_frozen();
        self.reconcile_node_expect();
        for path in self.services.keys() {
            self.reconcile_service_expect(path);
        }
        let node_frozen = self.node_gate.node_frozen().is_some();

        let decisions: Vec<(String, Decision)> = {
            let peer_timeout_ms = self.settings.peer_timeout.as_millis() as u64;
            let me = self.store.my_name();
            let now = now_ms();
            self.store.read(|inner| {
                let ctx = PlanContext {
                    me,
                    inner,
                    now_ms: now,
                    peer_timeout_ms,
                    max_restarts: self.settings.max_restarts,
                    node_frozen,
                };
                self.services
                    .values()
                    .filter(|service| !self.in_flight.contains_key(&service.path))
                    .map(|service| (service.path.clone(), plan_service(&ctx, service)))
                    .filter(|(_, decision)| *decision != Decision::Idle)
                    .collect()
            })
        };

        for (path, decision) in &decisions {
            self.apply(path, *decision);
        }
        self.finish_drain();

        self.passes.fetch_add(1, Ordering::Relaxed);
        metrics::RECONCILE_PASSES_TOTAL.inc();
        decisions
    }

    /// Mirrors the freeze gates into the local snapshot and makes sure every
    /// configured service has an instance entry.
    fn refresh_frozen(&self) {
        let node_frozen = self.node_gate.node_frozen();
        metrics::NODE_FROZEN.set(if node_frozen.is_some() { 1.0 } else { 0.0 });
        let service_frozen: Vec<(String, Option<u64>)> = self
            .services
            .keys()
            .map(|path| {
                let gate = FreezeGate::service(&self.var_dir, path);
                (path.clone(), gate.frozen(true))
            })
            .collect();

        self.store.try_update_local(|local| {
            let mut changed = false;
            if local.monitor.frozen != node_frozen {
                local.monitor.frozen = node_frozen;
                changed = true;
            }
            for (path, frozen) in service_frozen {
                let instance = local.services.entry(path).or_insert_with(|| {
                    changed = true;
                    Default::default()
                });
                if instance.frozen != frozen {
                    instance.frozen = frozen;
                    changed = true;
                }
            }
            changed.then_some(())
        });
    }

    fn reconcile_node_expect(&self) {
        let me = self.store.my_name();
        let adopt = self.store.read(|inner| expect::to_adopt(inner, me, &NodeScope));
        if let Some(Stamped { value, at }) = adopt {
            info!("Adopting node global_expect {} requested at {}.", value, at);
            self.store.update_local(|local| {
                local.monitor.global_expect = value;
                local.monitor.global_expect_updated = at;
            });
        }

        let local = self.store.local();
        let target = local.monitor.global_expect;
        let frozen = self.node_gate.node_frozen().is_some();
        let result = match target {
            GlobalExpect::Frozen if !frozen => self.node_gate.node_freeze(),
            GlobalExpect::Thawed if frozen => self.node_gate.node_thaw(),
            _ => Ok(()),
        };
        if let Err(e) = result {
            error!("Failed to apply node global_expect {}: {}", target, e);
            return;
        }

        let frozen = self.node_gate.node_frozen();
        let satisfied = match target {
            GlobalExpect::Frozen => frozen.is_some(),
            GlobalExpect::Thawed => frozen.is_none(),
            _ => false,
        };
        let at = local.monitor.global_expect_updated;
        if satisfied && self.store.read(|inner| expect::adopted_everywhere(inner, &NodeScope, at)) {
            info!("Node global_expect {} reached. Clearing.", target);
            self.store.update_local(|local| {
                local.monitor.global_expect = GlobalExpect::Unset;
                local.monitor.frozen = frozen;
            });
        }
    }

    fn reconcile_service_expect(&self, path: &str) {
        let me = self.store.my_name();
        let scope = ServiceScope(path);
        let adopt = self.store.read(|inner| expect::to_adopt(inner, me, &scope));
        if let Some(Stamped { value, at }) = adopt {
            info!("{}: adopting global_expect {} requested at {}.", path, value, at);
            self.store.update_local(|local| {
                let instance = local.services.entry(path.to_string()).or_default();
                instance.global_expect = value;
                instance.global_expect_updated = at;
            });
        }

        let Some(Stamped { value: target, at }) = scope.get(&self.store.local()) else {
            return;
        };
        let gate = FreezeGate::service(&self.var_dir, path);
        let result = match target {
            GlobalExpect::Frozen if gate.frozen(true).is_none() => gate.freeze(),
            GlobalExpect::Thawed | GlobalExpect::Started if gate.frozen(true).is_some() => {
                gate.thaw()
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            error!("{}: failed to apply global_expect {}: {}", path, target, e);
            return;
        }

        let satisfied = self.store.read(|inner| {
            let up_anywhere = inner
                .members
                .iter()
                .filter_map(|m| inner.nodes.get(m))
                .any(|snapshot| snapshot.service_up(path));
            let up_here = inner
                .nodes
                .get(me)
                .is_some_and(|snapshot| snapshot.service_up(path));
            match target {
                GlobalExpect::Frozen => gate.frozen(true).is_some(),
                GlobalExpect::Thawed => gate.frozen(true).is_none(),
                GlobalExpect::Started => up_anywhere,
                GlobalExpect::Stopped => !up_here,
                GlobalExpect::Unset => false,
            }
        });
        if !satisfied {
            return;
        }
        // A stopped ha service stays down once the target clears.
        let ha = self
            .services
            .get(path)
            .is_some_and(|service| service.orchestrate == Orchestrate::Ha);
        if target == GlobalExpect::Stopped && ha && gate.frozen(true).is_none() {
            if let Err(e) = gate.freeze() {
                error!("{}: failed to freeze after reaching {}: {}", path, target, e);
                return;
            }
        }
        if self.store.read(|inner| expect::adopted_everywhere(inner, &scope, at)) {
            info!("{}: global_expect {} reached. Clearing.", path, target);
            let frozen = gate.frozen(true);
            self.store.update_local(|local| {
                let instance = local.services.entry(path.to_string()).or_default();
                instance.global_expect = GlobalExpect::Unset;
                instance.frozen = frozen;
            });
        }
    }

    fn apply(self: &Arc<Self>, path: &str, decision: Decision) {
        match decision {
            Decision::Idle => {}
            Decision::Start => self.spawn_action(path, ServiceAction::Start),
            Decision::Stop => self.spawn_action(path, ServiceAction::Stop),
            Decision::Restart => {
                let restarts = self.store.update_local(|local| {
                    let instance = local.services.entry(path.to_string()).or_default();
                    instance.restarts += 1;
                    instance.restarts
                });
                warn!(
                    "{}: instance is down, restarting ({}/{}).",
                    path, restarts, self.settings.max_restarts
                );
                self.spawn_action(path, ServiceAction::Start);
            }
            Decision::ShutdownDone => {
                info!("{}: shutdown complete.", path);
                self.store.try_update_local(|local| {
                    let instance = local.services.get_mut(path)?;
                    (instance.local_expect == LocalExpect::Shutdown).then(|| {
                        instance.local_expect = LocalExpect::Unset;
                    })
                });
            }
            Decision::GiveUp => {
                warn!(
                    "{}: restart limit ({}) reached. Giving up.",
                    path, self.settings.max_restarts
                );
                self.store.update_local(|local| {
                    let instance = local.services.entry(path.to_string()).or_default();
                    instance.status = ServiceStatus::StartFailed;
                    instance.local_expect = LocalExpect::Unset;
                });
            }
        }
    }

    fn spawn_action(self: &Arc<Self>, path: &str, action: ServiceAction) {
        let Some(service) = self.services.get(path).cloned() else {
            warn!("{}: no such service, cannot {}.", path, action);
            return;
        };
        if self.in_flight.insert(path.to_string(), action).is_some() {
            return;
        }
        self.actions.fetch_add(1, Ordering::Relaxed);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_action(service, action).await });
    }

    async fn run_action(self: Arc<Self>, service: Arc<Service>, action: ServiceAction) {
        let path = service.path.clone();
        let running = match action {
            ServiceAction::Start => ServiceStatus::Starting,
            ServiceAction::Stop => ServiceStatus::Stopping,
        };
        self.store.update_local(|local| {
            let instance = local.services.entry(path.clone()).or_default();
            instance.status = running;
            instance.updated_at = now_ms();
        });

        let work = async {
            match action {
                ServiceAction::Start => service.start().await,
                ServiceAction::Stop => service.stop().await,
            }
        };
        let result = match timeout(self.settings.action_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout(format!(
                "{} of {} did not complete within {:?}",
                action, path, self.settings.action_timeout
            ))),
        };
        let avail = service.status(false).await;

        let outcome = if result.is_ok() { "ok" } else { "failed" };
        metrics::RESOURCE_ACTIONS_TOTAL
            .with_label_values(&[action.to_string().as_str(), outcome])
            .inc();
        match &result {
            Ok(()) => info!("{}: {} succeeded, status {}.", path, action, avail),
            Err(e) => error!("{}: {} failed: {}", path, action, e),
        }

        self.store.update_local(|local| {
            let instance = local.services.entry(path.clone()).or_default();
            instance.avail = avail;
            instance.updated_at = now_ms();
            match (action, result.is_ok()) {
                (ServiceAction::Start, true) => {
                    instance.status = ServiceStatus::Idle;
                    instance.local_expect = LocalExpect::Started;
                    if avail.is_up() {
                        instance.restarts = 0;
                    }
                }
                (ServiceAction::Start, false) => instance.status = ServiceStatus::StartFailed,
                (ServiceAction::Stop, true) => {
                    instance.status = ServiceStatus::Idle;
                    instance.local_expect = LocalExpect::Unset;
                    instance.restarts = 0;
                }
                (ServiceAction::Stop, false) => instance.status = ServiceStatus::StopFailed,
            }
        });
        self.in_flight.remove(&path);
        self.wake.wake(&format!("{action} {path}"), true);
    }

    /// Returns a draining node to idle once every pending shutdown is done.
    fn finish_drain(&self) {
        self.store.try_update_local(|local| {
            if local.monitor.status != NodeStatus::Draining {
                return None;
            }
            let pending = local
                .services
                .values()
                .any(|instance| instance.local_expect == LocalExpect::Shutdown);
            if pending {
                return None;
            }
            info!("Drain complete.");
            local.monitor.status = NodeStatus::Idle;
            local.monitor.status_updated = now_ms();
            Some(())
        });
    }
}
