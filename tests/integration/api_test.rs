// tests/integration/api_test.rs

use super::test_helpers::{service_config, test_config, test_state};
use hagent::core::cluster::GlobalExpect;
use hagent::core::join::{CLUSTER_SECRET_HEADER, NODE_NAME_HEADER};
use hagent::core::state::AgentState;
use hagent::server::api::{self, HandlerResult};
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;

const TOKEN: &str = "op-token";
const SECRET: &str = "s3cret";

struct TestServer {
    base: String,
    client: reqwest::Client,
    state: Arc<AgentState>,
    _dir: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config("node1", &["node1"], dir.path());
        config.listener.operator_token = Some(TOKEN.to_string());
        config.cluster.secret = Some(SECRET.to_string());
        config.services.push(service_config("svc1"));
        let state = test_state(config);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = api::router(state.clone(), true);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            state,
            _dir: dir,
        }
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, HandlerResult) {
        let res = self
            .client
            .post(format!("{}{}", self.base, path))
            .bearer_auth(TOKEN)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap())
    }
}

#[tokio::test]
async fn test_wake_monitor_always_succeeds() {
    let server = TestServer::start().await;
    let (status, result) = server
        .post("/wake_monitor", json!({"path": "svc1", "immediate": true}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result.status, 0);
    assert!(server.state.wake.is_pending());
}

#[tokio::test]
async fn test_operator_endpoints_require_token() {
    let server = TestServer::start().await;
    let res = server
        .client
        .post(format!("{}/node_monitor", server.base))
        .json(&json!({"global_expect": "frozen"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let result: HandlerResult = res.json().await.unwrap();
    assert_eq!(result.status, 1);
    assert_eq!(
        server.state.store.local().monitor.global_expect,
        GlobalExpect::Unset
    );
}

#[tokio::test]
async fn test_node_monitor_reports_already_satisfied_as_info() {
    let server = TestServer::start().await;
    let (status, result) = server
        .post("/node_monitor", json!({"global_expect": "thawed"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result.status, 0);
    assert!(result.error.is_empty());
    assert!(result.info[0].contains("already"), "got {result:?}");
}

#[tokio::test]
async fn test_node_monitor_rejects_invalid_value() {
    let server = TestServer::start().await;
    let (status, result) = server
        .post("/node_monitor", json!({"global_expect": "started"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(result.status, 1);
    assert_eq!(result.error.len(), 1);
}

#[tokio::test]
async fn test_node_monitor_sets_global_expect() {
    let server = TestServer::start().await;
    let (status, result) = server
        .post("/node_monitor", json!({"global_expect": "frozen"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result.status, 0);
    assert_eq!(
        server.state.store.local().monitor.global_expect,
        GlobalExpect::Frozen
    );
}

#[tokio::test]
async fn test_service_monitor_unknown_service() {
    let server = TestServer::start().await;
    let (status, result) = server
        .post("/service_monitor", json!({"path": "nope", "local_expect": "started"}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(result.status, 1);
}

#[tokio::test]
async fn test_lock_and_unlock() {
    let server = TestServer::start().await;
    let (status, result) = server
        .post("/lock", json!({"name": "maintenance", "timeout": "2s"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let id = result.data.unwrap()["id"].as_str().unwrap().to_string();
    assert!(server.state.locks.accepted("maintenance", &id));

    let (status, _) = server
        .post("/unlock", json!({"name": "maintenance", "id": id, "timeout": 1}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!server.state.store.local().locks.contains_key("maintenance"));
}

#[tokio::test]
async fn test_node_drain_times_out() {
    let server = TestServer::start().await;
    let (status, result) = server
        .post("/node_drain", json!({"wait": true, "time": 1}))
        .await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(result.status, 1);
    assert!(result.error[0].contains("svc1"));
}

#[tokio::test]
async fn test_join_requires_cluster_secret() {
    let server = TestServer::start().await;
    let res = server
        .client
        .post(format!("{}/join", server.base))
        .header(NODE_NAME_HEADER, "node2")
        .header(CLUSTER_SECRET_HEADER, "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(!server.state.store.is_member("node2"));
}

#[tokio::test]
async fn test_join_over_http() {
    let server = TestServer::start().await;
    let res = server
        .client
        .post(format!("{}/join", server.base))
        .header(NODE_NAME_HEADER, "node2")
        .header(CLUSTER_SECRET_HEADER, SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["cluster"]["nodes"], Value::from("node1 node2"));
    assert!(server.state.store.is_member("node2"));
}

#[tokio::test]
async fn test_daemon_status_and_metrics() {
    let server = TestServer::start().await;
    let status: Value = server
        .client
        .get(format!("{}/daemon_status", server.base))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["node"], Value::from("node1"));
    assert!(status["cluster"]["nodes"]["node1"]["services"]["svc1"].is_object());

    let metrics = server
        .client
        .get(format!("{}/metrics", server.base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("hagent_node_frozen"));
}

#[tokio::test]
async fn test_log_level_without_reload_handle() {
    let server = TestServer::start().await;
    let (status, result) = server
        .post("/daemon_log_level", json!({"level": "debug"}))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(result.status, 1);
}
