// src/server/api/auth.rs

//! Role checks for the two kinds of callers: operators, who present the
//! listener's bearer token, and cluster nodes, who present the cluster
//! secret and their own name.

use crate::core::errors::AgentError;
use crate::core::join::{CLUSTER_SECRET_HEADER, NODE_NAME_HEADER};
use crate::core::state::AgentState;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use tracing::warn;

pub const AUTHORIZATION_SCHEME: &str = "Bearer ";

fn header<'a>(headers: &'a HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Succeeds when no operator token is configured or the request carries it.
pub async fn authorize_operator(state: &AgentState, headers: &HeaderMap) -> Result<(), AgentError> {
    let token = state.config.lock().await.listener.operator_token.clone();
    let Some(token) = token else {
        return Ok(());
    };
    let presented =
        header(headers, AUTHORIZATION).and_then(|v| v.strip_prefix(AUTHORIZATION_SCHEME));
    if presented == Some(token.as_str()) {
        Ok(())
    } else {
        warn!("Rejected an operator request with a missing or wrong token.");
        Err(AgentError::Unauthorized("operator token required".to_string()))
    }
}

/// Checks the cluster secret and returns the calling node's name.
pub async fn authorize_node(state: &AgentState, headers: &HeaderMap) -> Result<String, AgentError> {
    let name = header(headers, NODE_NAME_HEADER)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            AgentError::Unauthorized(format!("missing {NODE_NAME_HEADER} header"))
        })?
        .to_string();

    let secret = state.config.lock().await.cluster.secret.clone();
    if let Some(secret) = secret
        && header(headers, CLUSTER_SECRET_HEADER) != Some(secret.as_str())
    {
        warn!("Rejected a node request from {} with a wrong cluster secret.", name);
        return Err(AgentError::Unauthorized("cluster secret mismatch".to_string()));
    }
    Ok(name)
}
