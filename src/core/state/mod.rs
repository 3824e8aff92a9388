// src/core/state/mod.rs

//! Defines the central `AgentState` struct: the one context object every
//! handler and background task shares.

use crate::config::Config;
use crate::core::cluster::{ClusterStore, LockManager};
use crate::core::errors::AgentError;
use crate::core::freeze::FreezeGate;
use crate::core::join::JoinProtocol;
use crate::core::monitor::{Drainer, NodeMonitor, ServiceMonitor};
use crate::core::orchestrator::{MonitorWake, Orchestrator, OrchestratorSettings, Services};
use crate::core::resource::Service;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, reload};

pub type LogReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

/// The shared state of a running agent.
#[derive(Debug)]
pub struct AgentState {
    pub config: Arc<Mutex<Config>>,
    /// Where membership changes are persisted. `None` keeps them in memory.
    pub config_path: Option<PathBuf>,
    pub store: Arc<ClusterStore>,
    pub wake: Arc<MonitorWake>,
    pub locks: LockManager,
    pub node_gate: FreezeGate,
    pub node_monitor: NodeMonitor,
    pub service_monitor: ServiceMonitor,
    pub drainer: Drainer,
    pub join: JoinProtocol,
    pub services: Arc<Services>,
    pub orchestrator: Arc<Orchestrator>,
    pub log_reload_handle: Option<Arc<LogReloadHandle>>,
    pub shutdown_tx: broadcast::Sender<()>,
}

/// Returns the hex SHA-256 of the serialized configuration.
pub fn config_digest(config: &Config) -> String {
    let serialized = toml::to_string(config).unwrap_or_default();
    hex::encode(Sha256::digest(serialized.as_bytes()))
}

impl AgentState {
    /// Builds every component from a validated configuration.
    pub fn initialize(
        config: Config,
        config_path: Option<PathBuf>,
        log_reload_handle: Option<Arc<LogReloadHandle>>,
    ) -> Result<Arc<Self>, AgentError> {
        std::fs::create_dir_all(&config.var_dir)?;

        let store = Arc::new(ClusterStore::new(
            config.node.name.clone(),
            config.cluster.nodes.clone(),
        ));
        let members = store.members();
        let services: Arc<Services> = Arc::new(
            config
                .services
                .iter()
                .map(|sc| (sc.path.clone(), Arc::new(Service::from_config(sc, &members))))
                .collect(),
        );

        let digest = config_digest(&config);
        store.update_local(|local| {
            local.config_digest = digest;
            for path in services.keys() {
                local.services.entry(path.clone()).or_default();
            }
        });

        let wake = Arc::new(MonitorWake::new());
        let locks = LockManager::new(store.clone(), wake.clone());
        let node_gate = FreezeGate::node(&config.var_dir);
        let node_monitor = NodeMonitor::new(store.clone(), wake.clone(), node_gate.clone());
        let service_monitor = ServiceMonitor::new(
            store.clone(),
            wake.clone(),
            services.clone(),
            config.var_dir.clone(),
        );
        let drainer = Drainer::new(store.clone(), wake.clone(), node_gate.clone());
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            wake.clone(),
            services.clone(),
            config.var_dir.clone(),
            OrchestratorSettings::from(&config),
        ));

        info!(
            "Agent state initialized for node {} ({} member(s), {} service(s)).",
            config.node.name,
            members.len(),
            services.len()
        );

        let config = Arc::new(Mutex::new(config));
        let join = JoinProtocol::new(
            store.clone(),
            locks.clone(),
            config.clone(),
            config_path.clone(),
        );
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Arc::new(Self {
            config,
            config_path,
            store,
            wake,
            locks,
            node_gate,
            node_monitor,
            service_monitor,
            drainer,
            join,
            services,
            orchestrator,
            log_reload_handle,
            shutdown_tx,
        }))
    }

    /// Signals every background task to stop.
    pub fn shutdown(&self) {
        info!("Shutdown requested.");
        let _ = self.shutdown_tx.send(());
    }
}
