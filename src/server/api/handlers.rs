// src/server/api/handlers.rs

use super::HandlerResult;
use super::auth::{authorize_node, authorize_operator};
use crate::core::cluster::NodeStatus;
use crate::core::errors::AgentError;
use crate::core::metrics;
use crate::core::monitor::{NodeMonitorRequest, ServiceMonitorRequest};
use crate::core::state::AgentState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::filter::EnvFilter;

/// A duration given either as seconds (`2`, `0.5`) or as text (`"2s"`).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum DurationArg {
    Seconds(f64),
    Text(#[serde(with = "humantime_serde")] Duration),
}

impl DurationArg {
    fn to_duration(self) -> Result<Duration, AgentError> {
        match self {
            DurationArg::Seconds(s) => Duration::try_from_secs_f64(s)
                .map_err(|e| AgentError::InvalidRequest(format!("invalid duration {s}: {e}"))),
            DurationArg::Text(d) => Ok(d),
        }
    }
}

fn duration(arg: Option<DurationArg>) -> Result<Option<Duration>, AgentError> {
    arg.map(DurationArg::to_duration).transpose()
}

/// Parses an optional JSON body. An empty body yields the default request.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AgentError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AgentError::InvalidRequest(format!("malformed request body: {e}")))
}

#[derive(Debug, Default, Deserialize)]
struct DrainRequest {
    #[serde(default)]
    wait: bool,
    time: Option<DurationArg>,
}

#[derive(Debug, Default, Deserialize)]
struct WakeRequest {
    path: Option<String>,
    reason: Option<String>,
    #[serde(default)]
    immediate: bool,
}

#[derive(Debug, Default, Deserialize)]
struct LockRequest {
    name: String,
    timeout: Option<DurationArg>,
}

#[derive(Debug, Default, Deserialize)]
struct UnlockRequest {
    name: String,
    id: String,
    timeout: Option<DurationArg>,
}

#[derive(Debug, Default, Deserialize)]
struct LogLevelRequest {
    level: String,
}

/// `POST /join`: admits the calling node and returns the cluster snapshot.
pub async fn join(
    State(state): State<Arc<AgentState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AgentError> {
    let joiner = authorize_node(&state, &headers).await?;
    let response = state.join.join(&joiner).await?;
    Ok(Json(response))
}

pub async fn node_monitor(
    State(state): State<Arc<AgentState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<HandlerResult, AgentError> {
    authorize_operator(&state, &headers).await?;
    let request: NodeMonitorRequest = parse_body(&body)?;
    let outcome = state.node_monitor.set(request)?;
    Ok(HandlerResult::from_outcome(outcome, "node monitor updated"))
}

pub async fn node_drain(
    State(state): State<Arc<AgentState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<HandlerResult, AgentError> {
    authorize_operator(&state, &headers).await?;
    let request: DrainRequest = parse_body(&body)?;
    let time = duration(request.time)?;
    let outcome = state
        .drainer
        .drain(NodeStatus::Draining, request.wait, time)
        .await?;
    let applied = if request.wait {
        "node drained"
    } else {
        "node drain started"
    };
    Ok(HandlerResult::from_outcome(outcome, applied))
}

/// `POST /daemon_shutdown`: drains with the `shutting` status, then stops
/// the agent. The agent stops even if the drain times out.
pub async fn daemon_shutdown(
    State(state): State<Arc<AgentState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<HandlerResult, AgentError> {
    authorize_operator(&state, &headers).await?;
    let request: DrainRequest = parse_body(&body)?;
    let time = duration(request.time)?;

    let task = tokio::spawn({
        let state = state.clone();
        async move {
            let result = state.drainer.drain(NodeStatus::Shutting, true, time).await;
            if let Err(e) = &result {
                warn!("Shutdown drain did not complete: {}", e);
            }
            state.shutdown();
            result
        }
    });

    if !request.wait {
        return Ok(HandlerResult::info("daemon shutdown started"));
    }
    let outcome = task
        .await
        .map_err(|e| AgentError::Internal(format!("shutdown task failed: {e}")))??;
    Ok(HandlerResult::from_outcome(outcome, "node drained, daemon stopping"))
}

/// `POST /wake_monitor`: fire-and-forget. Always succeeds once authorized.
pub async fn wake_monitor(
    State(state): State<Arc<AgentState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<HandlerResult, AgentError> {
    authorize_operator(&state, &headers).await?;
    let request: WakeRequest = parse_body(&body).unwrap_or_default();
    let reason = match (request.path, request.reason) {
        (Some(path), Some(reason)) => format!("{reason} ({path})"),
        (Some(path), None) => format!("wake_monitor ({path})"),
        (None, Some(reason)) => reason,
        (None, None) => "wake_monitor".to_string(),
    };
    state.wake.wake(&reason, request.immediate);
    Ok(HandlerResult::ok())
}

pub async fn service_monitor(
    State(state): State<Arc<AgentState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<HandlerResult, AgentError> {
    authorize_operator(&state, &headers).await?;
    let request: ServiceMonitorRequest = parse_body(&body)?;
    let outcome = state.service_monitor.set(request)?;
    Ok(HandlerResult::from_outcome(outcome, "service monitor updated"))
}

/// `POST /lock`: acquires a cluster lock on behalf of this node.
pub async fn lock(
    State(state): State<Arc<AgentState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<HandlerResult, AgentError> {
    authorize_operator(&state, &headers).await?;
    let request: LockRequest = parse_body(&body)?;
    if request.name.is_empty() {
        return Err(AgentError::InvalidRequest("lock name is required".to_string()));
    }
    let timeout = duration(request.timeout)?;
    let me = state.store.my_name().to_string();
    match state.locks.acquire(&me, &request.name, timeout).await {
        Some(id) => Ok(HandlerResult::ok().with_data(json!({ "id": id }))),
        None => Err(AgentError::LockNotAcquired(request.name)),
    }
}

pub async fn unlock(
    State(state): State<Arc<AgentState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<HandlerResult, AgentError> {
    authorize_operator(&state, &headers).await?;
    let request: UnlockRequest = parse_body(&body)?;
    if request.name.is_empty() || request.id.is_empty() {
        return Err(AgentError::InvalidRequest(
            "lock name and id are required".to_string(),
        ));
    }
    let timeout = duration(request.timeout)?;
    state
        .locks
        .release_and_wait(&request.name, &request.id, timeout, false)
        .await;
    Ok(HandlerResult::info(format!("lock {} released", request.name)))
}

/// `GET /daemon_status`: the whole cluster data store.
pub async fn daemon_status(
    State(state): State<Arc<AgentState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AgentError> {
    authorize_operator(&state, &headers).await?;
    let cluster = serde_json::to_value(state.store.dump())?;
    Ok(Json(json!({
        "node": state.store.my_name(),
        "reconcile_passes": state.orchestrator.passes(),
        "cluster": cluster,
    })))
}

pub async fn daemon_log_level(
    State(state): State<Arc<AgentState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<HandlerResult, AgentError> {
    authorize_operator(&state, &headers).await?;
    let request: LogLevelRequest = parse_body(&body)?;
    let handle = state
        .log_reload_handle
        .as_ref()
        .ok_or_else(|| AgentError::Internal("log level reload is not available".to_string()))?;
    let filter = EnvFilter::try_new(&request.level).map_err(|e| {
        AgentError::InvalidRequest(format!("invalid log level '{}': {e}", request.level))
    })?;
    handle
        .reload(filter)
        .map_err(|e| AgentError::Internal(format!("failed to reload the log filter: {e}")))?;
    state.config.lock().await.log_level = request.level.clone();
    info!("Log level set to '{}'.", request.level);
    Ok(HandlerResult::info(format!("log level set to {}", request.level)))
}

/// `GET /metrics` in the Prometheus text format.
pub async fn metrics(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    let frozen = state.node_gate.node_frozen().is_some();
    metrics::NODE_FROZEN.set(if frozen { 1.0 } else { 0.0 });
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}
