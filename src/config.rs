// src/config.rs

//! Manages agent configuration: loading, resolving defaults, validation and saving.

use crate::core::errors::AgentError;
use crate::core::resource::ServiceConfig;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::System;
use tracing::{info, warn};

/// Table name prefixes of driver sections that are carried verbatim and
/// handed to joining nodes.
pub const DRIVER_SECTION_PREFIXES: &[&str] =
    &["hb#", "stonith#", "pool#", "network#", "arbitrator#"];

/// Returns true if a top-level table name belongs to a driver section.
pub fn is_driver_section(name: &str) -> bool {
    DRIVER_SECTION_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Identity of the local node.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct NodeConfig {
    /// Defaults to the host name.
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
}

/// Cluster identity and membership.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    #[serde(default = "default_cluster_name")]
    pub name: String,
    #[serde(default)]
    pub id: String,
    /// The membership list, in join order.
    #[serde(default)]
    pub nodes: Vec<String>,
    /// Disaster-recovery nodes.
    #[serde(default)]
    pub drpnodes: Vec<String>,
    /// Quorum count. `0` disables quorum arbitration.
    #[serde(default)]
    pub quorum: u32,
    #[serde(default)]
    pub dns: Vec<String>,
    /// Shared HMAC key for gossip and node-to-node requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: default_cluster_name(),
            id: String::new(),
            nodes: Vec::new(),
            drpnodes: Vec::new(),
            quorum: 0,
            dns: Vec::new(),
            secret: None,
        }
    }
}

fn default_cluster_name() -> String {
    "default".to_string()
}

/// The RPC listener.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ListenerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_listener_port")]
    pub port: u16,
    /// Bearer token required on operator endpoints when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_token: Option<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_listener_port(),
            operator_token: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_listener_port() -> u16 {
    1215
}

/// The UDP gossip transport.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GossipConfig {
    #[serde(default = "default_gossip_port")]
    pub port: u16,
    #[serde(with = "humantime_serde", default = "default_gossip_interval")]
    pub interval: Duration,
    /// A peer with no ingested snapshot for this long is considered stale.
    #[serde(with = "humantime_serde", default = "default_peer_timeout")]
    pub peer_timeout: Duration,
    /// Node name to `host:port` overrides. Defaults to `<name>:<port>`.
    #[serde(default)]
    pub peers: BTreeMap<String, String>,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            port: default_gossip_port(),
            interval: default_gossip_interval(),
            peer_timeout: default_peer_timeout(),
            peers: BTreeMap::new(),
        }
    }
}

impl GossipConfig {
    /// Returns the gossip address of a peer.
    pub fn peer_addr(&self, node: &str) -> String {
        self.peers
            .get(node)
            .cloned()
            .unwrap_or_else(|| format!("{}:{}", node, self.port))
    }
}

fn default_gossip_port() -> u16 {
    10000
}
fn default_gossip_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_peer_timeout() -> Duration {
    Duration::from_secs(15)
}

/// The orchestration loop and its blocking protocols.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Periodic reconciliation tick.
    #[serde(with = "humantime_serde", default = "default_monitor_interval")]
    pub interval: Duration,
    /// How often resource status is re-evaluated.
    #[serde(with = "humantime_serde", default = "default_status_interval")]
    pub status_interval: Duration,
    /// Upper bound of a single start or stop action.
    #[serde(with = "humantime_serde", default = "default_action_timeout")]
    pub action_timeout: Duration,
    /// Default timeout of lock acquisitions requested over RPC.
    #[serde(with = "humantime_serde", default = "default_lock_timeout")]
    pub lock_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_join_lock_timeout")]
    pub join_lock_timeout: Duration,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: default_monitor_interval(),
            status_interval: default_status_interval(),
            action_timeout: default_action_timeout(),
            lock_timeout: default_lock_timeout(),
            join_lock_timeout: default_join_lock_timeout(),
            max_restarts: default_max_restarts(),
        }
    }
}

fn default_monitor_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_status_interval() -> Duration {
    Duration::from_secs(10)
}
fn default_action_timeout() -> Duration {
    Duration::from_secs(120)
}
fn default_lock_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_join_lock_timeout() -> Duration {
    Duration::from_secs(120)
}
fn default_max_restarts() -> u32 {
    3
}

/// Configuration for the Prometheus metrics endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MetricsConfig {
    /// If true, the listener exposes `GET /metrics`.
    #[serde(default)]
    pub enabled: bool,
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_var_dir")]
    var_dir: PathBuf,
    #[serde(default)]
    object_config: Option<PathBuf>,
    #[serde(default)]
    node: NodeConfig,
    #[serde(default)]
    cluster: ClusterConfig,
    #[serde(default)]
    listener: ListenerConfig,
    #[serde(default)]
    gossip: GossipConfig,
    #[serde(default)]
    monitor: MonitorConfig,
    #[serde(default)]
    metrics: MetricsConfig,
    #[serde(default)]
    services: Vec<ServiceConfig>,
    #[serde(flatten)]
    extra: BTreeMap<String, toml::Value>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_var_dir() -> PathBuf {
    PathBuf::from("/var/lib/hagent")
}

/// Represents the final, validated, and resolved agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub log_level: String,
    pub var_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_config: Option<PathBuf>,
    pub node: NodeConfig,
    pub cluster: ClusterConfig,
    pub listener: ListenerConfig,
    pub gossip: GossipConfig,
    pub monitor: MonitorConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    /// Driver-prefixed sections, preserved verbatim.
    #[serde(flatten)]
    pub drivers: BTreeMap<String, toml::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            var_dir: default_var_dir(),
            object_config: None,
            node: NodeConfig {
                name: default_node_name(),
                env: None,
            },
            cluster: ClusterConfig::default(),
            listener: ListenerConfig::default(),
            gossip: GossipConfig::default(),
            monitor: MonitorConfig::default(),
            metrics: MetricsConfig::default(),
            services: Vec::new(),
            drivers: BTreeMap::new(),
        }
    }
}

fn default_node_name() -> String {
    System::host_name().unwrap_or_else(|| "localhost".to_string())
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{}'", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Invalid configuration in '{}'", path.display()))
    }

    /// Parses, resolves and validates a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents).context("Failed to parse TOML")?;

        let mut drivers = BTreeMap::new();
        for (name, value) in raw.extra {
            if is_driver_section(&name) {
                drivers.insert(name, value);
            } else {
                warn!("Ignoring unknown configuration section '{}'.", name);
            }
        }

        let mut node = raw.node;
        if node.name.trim().is_empty() {
            node.name = default_node_name();
            info!("Node name not configured, using host name '{}'.", node.name);
        }

        let mut cluster = raw.cluster;
        if cluster.nodes.is_empty() {
            cluster.nodes.push(node.name.clone());
        }

        let config = Config {
            log_level: raw.log_level,
            var_dir: raw.var_dir,
            object_config: raw.object_config,
            node,
            cluster,
            listener: raw.listener,
            gossip: raw.gossip,
            monitor: raw.monitor,
            metrics: raw.metrics,
            services: raw.services,
            drivers,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.node.name.trim().is_empty() {
            return Err(anyhow!("node.name cannot be empty"));
        }
        if self.cluster.nodes.iter().any(|n| n.trim().is_empty()) {
            return Err(anyhow!("cluster.nodes cannot contain empty names"));
        }
        if !self.cluster.nodes.contains(&self.node.name) {
            return Err(anyhow!(
                "node '{}' is not listed in cluster.nodes",
                self.node.name
            ));
        }
        if self.listener.port == 0 {
            return Err(anyhow!("listener.port cannot be 0"));
        }
        if self.gossip.port == 0 {
            return Err(anyhow!("gossip.port cannot be 0"));
        }
        if self.gossip.port == self.listener.port {
            return Err(anyhow!(
                "gossip.port cannot be the same as the listener port"
            ));
        }
        if self.gossip.interval.is_zero() || self.gossip.peer_timeout.is_zero() {
            return Err(anyhow!("gossip intervals cannot be 0"));
        }
        if self.gossip.peer_timeout <= self.gossip.interval {
            warn!(
                "gossip.peer_timeout ({:?}) is not longer than gossip.interval ({:?}). Peers will flap stale.",
                self.gossip.peer_timeout, self.gossip.interval
            );
        }
        if self.monitor.interval.is_zero()
            || self.monitor.status_interval.is_zero()
            || self.monitor.action_timeout.is_zero()
            || self.monitor.lock_timeout.is_zero()
            || self.monitor.join_lock_timeout.is_zero()
        {
            return Err(anyhow!("monitor intervals and timeouts cannot be 0"));
        }
        if self.cluster.secret.is_none() && self.cluster.nodes.len() > 1 {
            warn!("cluster.secret is not set. Gossip and node-to-node requests are unauthenticated.");
        }

        let mut paths = HashSet::new();
        for service in &self.services {
            if service.path.trim().is_empty() {
                return Err(anyhow!("service path cannot be empty"));
            }
            if !paths.insert(service.path.as_str()) {
                return Err(anyhow!("duplicate service path '{}'", service.path));
            }
            let mut rids = HashSet::new();
            for resource in &service.resources {
                if !rids.insert(resource.rid.as_str()) {
                    return Err(anyhow!(
                        "duplicate resource id '{}' in service '{}'",
                        resource.rid,
                        service.path
                    ));
                }
            }
        }
        Ok(())
    }

    /// Returns the driver-prefixed sections.
    pub fn driver_sections(&self) -> &BTreeMap<String, toml::Value> {
        &self.drivers
    }

    /// Writes the configuration atomically: a temporary file renamed over the target.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AgentError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        let temp_path = PathBuf::from(format!(
            "{}.tmp-{}",
            path.display(),
            rand::random::<u32>()
        ));
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, path)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}
