// src/core/errors.rs

//! Defines the primary error type for the entire agent.

use axum::http::StatusCode;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the agent.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("lock not acquired: {0}")]
    LockNotAcquired(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("resource {rid}: {message}")]
    Resource { rid: String, message: String },

    #[error("Gossip Error: {0}")]
    Gossip(String),

    #[error("Config Error: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Maps the error onto the HTTP status returned by the RPC listener.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AgentError::LockNotAcquired(_) => StatusCode::SERVICE_UNAVAILABLE,
            AgentError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            AgentError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AgentError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AgentError::UnknownNode(_) | AgentError::UnknownService(_) => StatusCode::NOT_FOUND,
            AgentError::HttpClientError(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Builds a resource error from a driver id and a message.
    pub fn resource(rid: impl Into<String>, message: impl Into<String>) -> Self {
        AgentError::Resource {
            rid: rid.into(),
            message: message.into(),
        }
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for AgentError {
    fn clone(&self) -> Self {
        match self {
            AgentError::Io(e) => AgentError::Io(Arc::clone(e)),
            AgentError::LockNotAcquired(s) => AgentError::LockNotAcquired(s.clone()),
            AgentError::Timeout(s) => AgentError::Timeout(s.clone()),
            AgentError::InvalidRequest(s) => AgentError::InvalidRequest(s.clone()),
            AgentError::Unauthorized(s) => AgentError::Unauthorized(s.clone()),
            AgentError::UnknownNode(s) => AgentError::UnknownNode(s.clone()),
            AgentError::UnknownService(s) => AgentError::UnknownService(s.clone()),
            AgentError::Resource { rid, message } => AgentError::Resource {
                rid: rid.clone(),
                message: message.clone(),
            },
            AgentError::Gossip(s) => AgentError::Gossip(s.clone()),
            AgentError::Config(s) => AgentError::Config(s.clone()),
            AgentError::HttpClientError(s) => AgentError::HttpClientError(s.clone()),
            AgentError::Internal(s) => AgentError::Internal(s.clone()),
        }
    }
}

impl PartialEq for AgentError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AgentError::Io(e1), AgentError::Io(e2)) => e1.to_string() == e2.to_string(),
            (
                AgentError::Resource {
                    rid: r1,
                    message: m1,
                },
                AgentError::Resource {
                    rid: r2,
                    message: m2,
                },
            ) => r1 == r2 && m1 == m2,
            _ => {
                core::mem::discriminant(self) == core::mem::discriminant(other)
                    && self.to_string() == other.to_string()
            }
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        AgentError::HttpClientError(e.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<toml::de::Error> for AgentError {
    fn from(e: toml::de::Error) -> Self {
        AgentError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for AgentError {
    fn from(e: toml::ser::Error) -> Self {
        AgentError::Config(e.to_string())
    }
}
