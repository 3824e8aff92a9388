// src/server/api/mod.rs

//! The RPC listener: an axum router exposing the coordination handlers.
//!
//! Operator endpoints answer with a [`HandlerResult`], whose `status` is an
//! error count rather than an HTTP status. Failures also set the HTTP status
//! from [`AgentError::status_code`].

mod auth;
mod handlers;

use crate::core::errors::AgentError;
use crate::core::monitor::MonitorOutcome;
use crate::core::state::AgentState;
use axum::Json;
use axum::Router;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub use auth::{AUTHORIZATION_SCHEME, authorize_node, authorize_operator};

/// The structured result of an operator handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerResult {
    pub status: usize,
    #[serde(default)]
    pub info: Vec<String>,
    #[serde(default)]
    pub error: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl HandlerResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            info: vec![message.into()],
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: 1,
            error: vec![message.into()],
            ..Self::default()
        }
    }

    /// An already-satisfied request is reported as info, never as an error.
    pub fn from_outcome(outcome: MonitorOutcome, applied: &str) -> Self {
        match outcome {
            MonitorOutcome::Applied => Self::info(applied),
            MonitorOutcome::AlreadySatisfied(reason) => Self::info(reason),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl IntoResponse for HandlerResult {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(HandlerResult::failed(self.to_string()))).into_response()
    }
}

/// Builds the router for the RPC listener.
pub fn router(state: Arc<AgentState>, metrics_enabled: bool) -> Router {
    let mut router = Router::new()
        .route("/join", post(handlers::join))
        .route("/node_monitor", post(handlers::node_monitor))
        .route("/node_drain", post(handlers::node_drain))
        .route("/daemon_shutdown", post(handlers::daemon_shutdown))
        .route("/wake_monitor", post(handlers::wake_monitor))
        .route("/service_monitor", post(handlers::service_monitor))
        .route("/lock", post(handlers::lock))
        .route("/unlock", post(handlers::unlock))
        .route("/daemon_status", get(handlers::daemon_status))
        .route("/daemon_log_level", post(handlers::daemon_log_level));
    if metrics_enabled {
        router = router.route("/metrics", get(handlers::metrics));
    }
    router.with_state(state)
}
