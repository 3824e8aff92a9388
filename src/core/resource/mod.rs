// src/core/resource/mod.rs

//! The resource driver contract consumed by the orchestration loop, and the
//! `Service` grouping of resources.

pub mod command;
pub mod config;

pub use command::CommandResource;
pub use config::{Orchestrate, ResourceConfig, ServiceConfig};

use crate::core::errors::AgentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// The status a resource (or an aggregate of resources) reports.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum ResourceStatus {
    #[serde(rename = "up")]
    #[strum(serialize = "up")]
    Up,
    #[serde(rename = "down")]
    #[strum(serialize = "down")]
    Down,
    #[serde(rename = "warn")]
    #[strum(serialize = "warn")]
    Warn,
    #[default]
    #[serde(rename = "n/a")]
    #[strum(serialize = "n/a")]
    NA,
    #[serde(rename = "stdby up")]
    #[strum(serialize = "stdby up")]
    StdbyUp,
    #[serde(rename = "stdby down")]
    #[strum(serialize = "stdby down")]
    StdbyDown,
    #[serde(rename = "undef")]
    #[strum(serialize = "undef")]
    Undef,
}

impl ResourceStatus {
    /// Up or degraded-but-running.
    pub fn is_up(self) -> bool {
        matches!(self, ResourceStatus::Up | ResourceStatus::Warn)
    }

    /// Known to be down, standby resources aside. `n/a` and `undef` are
    /// neither up nor down.
    pub fn is_down(self) -> bool {
        matches!(
            self,
            ResourceStatus::Down | ResourceStatus::StdbyUp | ResourceStatus::StdbyDown
        )
    }

    /// Combines resource statuses into a service status.
    ///
    /// `n/a` resources are ignored. Any `warn`, or a mix of up and down
    /// resources, yields `warn`. Standby resources alone yield their standby
    /// status. `undef` only surfaces when nothing else is known.
    pub fn aggregate(statuses: impl IntoIterator<Item = ResourceStatus>) -> ResourceStatus {
        let (mut up, mut down, mut stdby_up, mut stdby_down, mut warn, mut undef) =
            (false, false, false, false, false, false);
        for status in statuses {
            match status {
                ResourceStatus::Up => up = true,
                ResourceStatus::Down => down = true,
                ResourceStatus::Warn => warn = true,
                ResourceStatus::NA => {}
                ResourceStatus::StdbyUp => stdby_up = true,
                ResourceStatus::StdbyDown => stdby_down = true,
                ResourceStatus::Undef => undef = true,
            }
        }
        if warn || (up && (down || stdby_down)) {
            return ResourceStatus::Warn;
        }
        if up {
            return ResourceStatus::Up;
        }
        if down {
            return ResourceStatus::Down;
        }
        if stdby_down {
            return ResourceStatus::StdbyDown;
        }
        if stdby_up {
            return ResourceStatus::StdbyUp;
        }
        if undef {
            return ResourceStatus::Undef;
        }
        ResourceStatus::NA
    }
}

/// A resource driver. Implementations must be idempotent: starting an
/// already started resource succeeds without doing anything.
#[async_trait]
pub trait Resource: Send + Sync + fmt::Debug {
    fn rid(&self) -> &str;

    /// Standby resources are left running when their service stops.
    fn is_standby(&self) -> bool {
        false
    }

    async fn start(&self) -> Result<(), AgentError>;

    async fn stop(&self) -> Result<(), AgentError>;

    async fn status(&self, verbose: bool) -> ResourceStatus;
}

/// A managed service: an ordered set of resources.
#[derive(Debug, Clone)]
pub struct Service {
    pub path: String,
    /// Ordered placement list.
    pub nodes: Vec<String>,
    pub orchestrate: Orchestrate,
    resources: Vec<Arc<dyn Resource>>,
}

impl Service {
    pub fn new(
        path: impl Into<String>,
        nodes: Vec<String>,
        orchestrate: Orchestrate,
        resources: Vec<Arc<dyn Resource>>,
    ) -> Self {
        Self {
            path: path.into(),
            nodes,
            orchestrate,
            resources,
        }
    }

    /// Builds a service of command resources. An empty node list means every cluster member.
    pub fn from_config(config: &ServiceConfig, members: &[String]) -> Self {
        let nodes = if config.nodes.is_empty() {
            members.to_vec()
        } else {
            config.nodes.clone()
        };
        let resources = config
            .resources
            .iter()
            .map(|rc| Arc::new(CommandResource::new(rc.clone())) as Arc<dyn Resource>)
            .collect();
        Self::new(config.path.clone(), nodes, config.orchestrate, resources)
    }

    pub fn resources(&self) -> &[Arc<dyn Resource>] {
        &self.resources
    }

    /// Starts resources in order, stopping at the first failure.
    pub async fn start(&self) -> Result<(), AgentError> {
        info!("Starting service {}.", self.path);
        for resource in &self.resources {
            resource.start().await?;
        }
        Ok(())
    }

    /// Stops non-standby resources in reverse order. Keeps going after a
    /// failure and reports the first error.
    pub async fn stop(&self) -> Result<(), AgentError> {
        info!("Stopping service {}.", self.path);
        let mut first_error = None;
        for resource in self.resources.iter().rev() {
            if resource.is_standby() {
                continue;
            }
            if let Err(e) = resource.stop().await {
                warn!("Service {}: {}", self.path, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Aggregates the status of every resource.
    pub async fn status(&self, verbose: bool) -> ResourceStatus {
        let mut statuses = Vec::with_capacity(self.resources.len());
        for resource in &self.resources {
            statuses.push(resource.status(verbose).await);
        }
        ResourceStatus::aggregate(statuses)
    }
}
