// src/core/resource/command.rs

//! A resource driven by shell commands.

use super::config::ResourceConfig;
use super::{Resource, ResourceStatus};
use crate::core::errors::AgentError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct CommandResource {
    config: ResourceConfig,
}

impl CommandResource {
    pub fn new(config: ResourceConfig) -> Self {
        Self { config }
    }

    /// Runs `sh -c <command>` and returns its exit status success.
    async fn run(&self, command: &str) -> Result<bool, AgentError> {
        debug!("{}: running '{}'", self.config.rid, command);
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| AgentError::resource(&self.config.rid, format!("spawn failed: {e}")))?;
        let output = timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                AgentError::resource(
                    &self.config.rid,
                    format!("'{}' timed out after {:?}", command, self.config.timeout),
                )
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(
                "{}: '{}' exited with {}: {}",
                self.config.rid,
                command,
                output.status,
                stderr.trim()
            );
        }
        Ok(output.status.success())
    }

    async fn action(&self, name: &str, command: Option<&String>) -> Result<(), AgentError> {
        let Some(command) = command else {
            debug!("{}: no {} command.", self.config.rid, name);
            return Ok(());
        };
        if self.run(command).await? {
            Ok(())
        } else {
            Err(AgentError::resource(
                &self.config.rid,
                format!("{name} command failed"),
            ))
        }
    }
}

#[async_trait]
impl Resource for CommandResource {
    fn rid(&self) -> &str {
        &self.config.rid
    }

    fn is_standby(&self) -> bool {
        self.config.standby
    }

    async fn start(&self) -> Result<(), AgentError> {
        let status = self.status(false).await;
        if status.is_up() || status == ResourceStatus::StdbyUp {
            info!("{} is already up.", self.config.rid);
            return Ok(());
        }
        self.action("start", self.config.start.as_ref()).await
    }

    async fn stop(&self) -> Result<(), AgentError> {
        let status = self.status(false).await;
        if matches!(status, ResourceStatus::Down | ResourceStatus::StdbyDown) {
            info!("{} is already down.", self.config.rid);
            return Ok(());
        }
        self.action("stop", self.config.stop.as_ref()).await
    }

    async fn status(&self, verbose: bool) -> ResourceStatus {
        let Some(check) = self.config.check.as_ref() else {
            return ResourceStatus::NA;
        };
        let up = match self.run(check).await {
            Ok(up) => up,
            Err(e) => {
                if verbose {
                    info!("{}: status check failed: {}", self.config.rid, e);
                }
                return ResourceStatus::Undef;
            }
        };
        match (up, self.config.standby) {
            (true, false) => ResourceStatus::Up,
            (true, true) => ResourceStatus::StdbyUp,
            (false, false) => ResourceStatus::Down,
            (false, true) => ResourceStatus::StdbyDown,
        }
    }
}
