// src/core/join.rs

//! The node-join protocol.
//!
//! The member that receives a join request admits the joiner under the
//! cluster-wide `join` lock and a local guard, then hands back the
//! configuration sections every member shares. The joining side merges
//! that answer into its own configuration file.

use crate::config::{Config, is_driver_section};
use crate::core::cluster::{ClusterStore, LockManager};
use crate::core::errors::AgentError;
use serde_json::{Map, Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Name of the distributed lock serializing membership changes.
pub const JOIN_LOCK: &str = "join";
/// Header carrying the shared cluster secret on node-to-node requests.
pub const CLUSTER_SECRET_HEADER: &str = "x-cluster-secret";
/// Header naming the calling node on node-to-node requests.
pub const NODE_NAME_HEADER: &str = "x-node-name";

#[derive(Debug)]
pub struct JoinProtocol {
    store: Arc<ClusterStore>,
    locks: LockManager,
    /// Serializes membership mutations on this node.
    guard: Mutex<()>,
    config: Arc<Mutex<Config>>,
    config_path: Option<PathBuf>,
}

impl JoinProtocol {
    pub fn new(
        store: Arc<ClusterStore>,
        locks: LockManager,
        config: Arc<Mutex<Config>>,
        config_path: Option<PathBuf>,
    ) -> Self {
        Self {
            store,
            locks,
            guard: Mutex::new(()),
            config,
            config_path,
        }
    }

    /// Admits `joiner` into the cluster and returns the shared configuration.
    pub async fn join(&self, joiner: &str) -> Result<Value, AgentError> {
        if joiner.trim().is_empty() {
            return Err(AgentError::InvalidRequest(
                "joining node name cannot be empty".to_string(),
            ));
        }
        let timeout = self.config.lock().await.monitor.join_lock_timeout;
        let me = self.store.my_name().to_string();

        let Some(lock_id) = self.locks.acquire(&me, JOIN_LOCK, Some(timeout)).await else {
            warn!("Join of {} refused: lock not acquired.", joiner);
            return Err(AgentError::LockNotAcquired(JOIN_LOCK.to_string()));
        };

        let result = self.admit(joiner).await;
        if let Err(e) = &result {
            error!("Join of {} failed: {}", joiner, e);
        }
        if !self.locks.release(JOIN_LOCK, &lock_id) {
            warn!("Join lock {} was already gone at release.", lock_id);
        }
        result
    }

    async fn admit(&self, joiner: &str) -> Result<Value, AgentError> {
        let _guard = self.guard.lock().await;
        let mut config = self.config.lock().await;

        if self.store.is_member(joiner) {
            info!("Node {} is rejoining the cluster.", joiner);
        } else {
            self.store.add_member(joiner);
            info!("Node {} joined the cluster.", joiner);
        }
        // The config file may lag behind gossip-learned members.
        let members = self.store.members();
        if config.cluster.nodes != members {
            config.cluster.nodes = members;
            if let Some(path) = &self.config_path {
                config.save(path)?;
            }
        }

        build_join_response(&config)
    }
}

/// Assembles the sections a joining node is entitled to by default.
pub fn build_join_response(config: &Config) -> Result<Value, AgentError> {
    let mut response = Map::new();

    let mut node = Map::new();
    if let Some(env) = &config.node.env {
        node.insert("env".to_string(), json!(env));
    }
    response.insert("node".to_string(), Value::Object(node));

    response.insert(
        "cluster".to_string(),
        json!({
            "name": config.cluster.name,
            "id": config.cluster.id,
            "nodes": config.cluster.nodes.join(" "),
            "drpnodes": config.cluster.drpnodes.join(" "),
            "quorum": config.cluster.quorum,
            "dns": config.cluster.dns.join(" "),
        }),
    );

    for (name, section) in config.driver_sections() {
        response.insert(name.clone(), serde_json::to_value(section)?);
    }

    if let Some(path) = &config.object_config
        && let Some(object) = read_object_config(path)?
    {
        response.insert("cluster_config".to_string(), object);
    }
    Ok(Value::Object(response))
}

/// Reads the cluster-wide configuration object, if it exists.
fn read_object_config(path: &Path) -> Result<Option<Value>, AgentError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let data: toml::Table = toml::from_str(&contents)?;
    let mtime = fs::metadata(path)?
        .modified()?
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    Ok(Some(json!({
        "data": serde_json::to_value(data)?,
        "mtime": mtime,
    })))
}

fn split_list(value: Option<&Value>) -> Option<Vec<String>> {
    value
        .and_then(Value::as_str)
        .map(|s| s.split_whitespace().map(str::to_string).collect())
}

/// Merges a join response into the local configuration.
pub fn merge_join_response(config: &mut Config, response: &Value) -> Result<(), AgentError> {
    let Some(response) = response.as_object() else {
        return Err(AgentError::Internal(
            "join response is not an object".to_string(),
        ));
    };

    if let Some(env) = response
        .get("node")
        .and_then(|n| n.get("env"))
        .and_then(Value::as_str)
    {
        config.node.env = Some(env.to_string());
    }

    let cluster = response
        .get("cluster")
        .ok_or_else(|| AgentError::Internal("join response has no cluster section".to_string()))?;
    if let Some(name) = cluster.get("name").and_then(Value::as_str) {
        config.cluster.name = name.to_string();
    }
    if let Some(id) = cluster.get("id").and_then(Value::as_str) {
        config.cluster.id = id.to_string();
    }
    if let Some(nodes) = split_list(cluster.get("nodes")) {
        config.cluster.nodes = nodes;
    }
    if !config.cluster.nodes.contains(&config.node.name) {
        config.cluster.nodes.push(config.node.name.clone());
    }
    if let Some(drpnodes) = split_list(cluster.get("drpnodes")) {
        config.cluster.drpnodes = drpnodes;
    }
    if let Some(dns) = split_list(cluster.get("dns")) {
        config.cluster.dns = dns;
    }
    if let Some(quorum) = cluster.get("quorum").and_then(Value::as_u64) {
        config.cluster.quorum = quorum as u32;
    }

    for (name, section) in response {
        if is_driver_section(name) {
            let value: toml::Value = serde_json::from_value(section.clone())?;
            config.drivers.insert(name.clone(), value);
        }
    }
    Ok(())
}

/// Joins the cluster through the member listening at `peer` (`host:port`),
/// then saves the merged configuration to `config_path`.
pub async fn join_cluster(
    config: &mut Config,
    config_path: &Path,
    peer: &str,
) -> Result<(), AgentError> {
    let url = if peer.starts_with("http://") || peer.starts_with("https://") {
        format!("{}/join", peer.trim_end_matches('/'))
    } else {
        format!("http://{peer}/join")
    };
    info!("Joining the cluster through {}.", url);

    let client = reqwest::Client::new();
    let mut request = client
        .post(&url)
        .header(NODE_NAME_HEADER, config.node.name.as_str());
    if let Some(secret) = &config.cluster.secret {
        request = request.header(CLUSTER_SECRET_HEADER, secret.as_str());
    }
    let res = request.send().await?;
    let status = res.status();
    if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
        return Err(AgentError::LockNotAcquired(format!(
            "{JOIN_LOCK} (via {peer})"
        )));
    }
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(AgentError::HttpClientError(format!(
            "join through {peer} failed with {status}: {body}"
        )));
    }
    let response: Value = res.json().await?;

    merge_join_response(config, &response)?;
    if let (Some(object), Some(path)) = (response.get("cluster_config"), &config.object_config) {
        if let Some(data) = object.get("data") {
            let table: toml::Table = serde_json::from_value(data.clone())?;
            fs::write(path, toml::to_string_pretty(&table)?)?;
            info!("Cluster configuration object written to {}.", path.display());
        }
    }
    config.save(config_path)?;
    info!(
        "Joined cluster {} ({} nodes).",
        config.cluster.name,
        config.cluster.nodes.len()
    );
    Ok(())
}
