// src/core/tasks/mod.rs

//! This module contains the long-running background tasks that support the
//! orchestration loop.

pub mod peer_watchdog;
pub mod status_checker;
