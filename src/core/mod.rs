// src/core/mod.rs

//! The central module containing the core logic and data structures of the agent.

pub mod cluster;
pub mod errors;
pub mod freeze;
pub mod join;
pub mod metrics;
pub mod monitor;
pub mod orchestrator;
pub mod resource;
pub mod state;
pub mod tasks;

pub use errors::AgentError;
pub use state::AgentState;
