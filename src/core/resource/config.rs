// src/core/resource/config.rs

//! Defines the service and resource configuration options.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Whether the orchestration loop may start a service on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orchestrate {
    /// Only explicit operator requests start or stop the service.
    #[default]
    No,
    /// Failover: the service is kept up on exactly one node.
    Ha,
}

/// One `[[services]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Unique service path, e.g. `prod/web`.
    pub path: String,
    /// Ordered placement list. Defaults to the cluster membership.
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub orchestrate: Orchestrate,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// One `[[services.resources]]` table, driven by shell commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Resource id, unique within the service, e.g. `app#1`.
    pub rid: String,
    pub start: Option<String>,
    pub stop: Option<String>,
    /// Exit code 0 means up. Without a check command the status is `n/a`.
    pub check: Option<String>,
    /// Standby resources stay up when the service is stopped.
    #[serde(default)]
    pub standby: bool,
    #[serde(with = "humantime_serde", default = "default_command_timeout")]
    pub timeout: Duration,
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(60)
}
