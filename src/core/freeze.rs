// src/core/freeze.rs

//! The freeze gate: a zero-byte marker file whose presence suppresses
//! automatic orchestration actions, and whose modification time is the
//! frozen-since timestamp.
//!
//! A node-scope flag lives at a fixed path under the agent's var directory.
//! A service-scope flag lives under the service's private state directory.
//! A node freeze makes every service on the node effectively frozen when
//! checked non-strictly. A service freeze does not imply a node freeze.

use crate::core::errors::AgentError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

const FLAG_NAME: &str = "frozen";

/// Returns the node-scope flag path for a var directory.
pub fn node_flag_path(var_dir: &Path) -> PathBuf {
    var_dir.join("node").join(FLAG_NAME)
}

/// Returns the service-scope flag path for a var directory and service path.
pub fn service_flag_path(var_dir: &Path, service_path: &str) -> PathBuf {
    var_dir.join("services").join(service_path).join(FLAG_NAME)
}

/// Returns the flag's modification time in ms since the epoch, or `None` if absent.
fn flag_mtime(path: &Path) -> Option<u64> {
    let metadata = fs::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    let ms = modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    // A flag created within the epoch's first millisecond is still frozen.
    Some(ms.max(1))
}

fn create_flag(path: &Path) -> Result<(), AgentError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::File::create(path)?;
    Ok(())
}

fn remove_flag(path: &Path) -> Result<(), AgentError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// A freeze gate for one scope. For the node scope, `flag` and `node_flag` are the same path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreezeGate {
    flag: PathBuf,
    node_flag: PathBuf,
}

impl FreezeGate {
    /// The node-scope gate.
    pub fn node(var_dir: &Path) -> Self {
        let node_flag = node_flag_path(var_dir);
        Self {
            flag: node_flag.clone(),
            node_flag,
        }
    }

    /// The gate of one service instance.
    pub fn service(var_dir: &Path, service_path: &str) -> Self {
        Self {
            flag: service_flag_path(var_dir, service_path),
            node_flag: node_flag_path(var_dir),
        }
    }

    pub fn flag_path(&self) -> &Path {
        &self.flag
    }

    /// Returns the frozen-since timestamp of this scope's flag. When the flag
    /// is absent and `strict` is false, falls back to the node-scope flag.
    pub fn frozen(&self, strict: bool) -> Option<u64> {
        if let Some(ts) = flag_mtime(&self.flag) {
            return Some(ts);
        }
        if strict {
            return None;
        }
        self.node_frozen()
    }

    /// Creates this scope's flag. Idempotent.
    pub fn freeze(&self) -> Result<(), AgentError> {
        create_flag(&self.flag)?;
        info!("Frozen: {}", self.flag.display());
        Ok(())
    }

    /// Removes this scope's flag. Idempotent. A no-op when this scope's flag
    /// is the node-scope flag: a node freeze is lifted with [`Self::node_thaw`].
    pub fn thaw(&self) -> Result<(), AgentError> {
        if self.flag == self.node_flag {
            debug!("Thaw ignored: {} is the node freeze flag.", self.flag.display());
            return Ok(());
        }
        remove_flag(&self.flag)?;
        info!("Thawed: {}", self.flag.display());
        Ok(())
    }

    pub fn node_frozen(&self) -> Option<u64> {
        flag_mtime(&self.node_flag)
    }

    pub fn node_freeze(&self) -> Result<(), AgentError> {
        create_flag(&self.node_flag)?;
        info!("Node frozen.");
        Ok(())
    }

    pub fn node_thaw(&self) -> Result<(), AgentError> {
        remove_flag(&self.node_flag)?;
        info!("Node thawed.");
        Ok(())
    }

    /// Freezes, logging instead of failing. Used by protocols that must
    /// proceed even if the marker cannot be written.
    pub fn node_freeze_logged(&self) -> bool {
        match self.node_freeze() {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to freeze the node: {}", e);
                false
            }
        }
    }
}
