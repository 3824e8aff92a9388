// src/core/orchestrator/wake.rs

//! Coalescing wake signal for the orchestration loop.

use crate::core::metrics;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::debug;

/// Keeps at most this many pending reasons. Older ones are only useful for logs.
const MAX_PENDING_REASONS: usize = 32;

/// A wake request with reasons attached. Any number of immediate wakes
/// issued before the loop gets to run fold into one pass.
#[derive(Debug, Default)]
pub struct MonitorWake {
    notify: Notify,
    armed: AtomicBool,
    reasons: Mutex<Vec<String>>,
}

impl MonitorWake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `reason`. With `immediate`, preempts the periodic tick;
    /// otherwise the reason is picked up by the next pass.
    pub fn wake(&self, reason: &str, immediate: bool) {
        {
            let mut reasons = self.reasons.lock();
            if reasons.len() < MAX_PENDING_REASONS && !reasons.iter().any(|r| r == reason) {
                reasons.push(reason.to_string());
            }
        }
        if !immediate {
            return;
        }
        if self.armed.swap(true, Ordering::AcqRel) {
            metrics::COALESCED_WAKES_TOTAL.inc();
            debug!("Wake '{}' coalesced into the pending wake.", reason);
        } else {
            debug!("Immediate wake requested: {}", reason);
        }
        self.notify.notify_one();
    }

    /// Resolves once an immediate wake is pending.
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    /// Disarms the pending wake and returns the reasons collected since the last pass.
    pub fn take_reasons(&self) -> Vec<String> {
        self.armed.store(false, Ordering::Release);
        std::mem::take(&mut *self.reasons.lock())
    }

    /// Returns true if an immediate wake is waiting to be consumed.
    pub fn is_pending(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}
