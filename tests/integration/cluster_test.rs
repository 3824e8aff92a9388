// tests/integration/cluster_test.rs

use super::test_helpers::{SimNode, exchange, init_tracing, spawn_pump, test_config, test_state};
use hagent::core::cluster::lock::LOCK_POLL_INTERVAL;
use hagent::core::join::JOIN_LOCK;
use serde_json::Value;
use std::time::Duration;
use tempfile::tempdir;

const PUMP_PERIOD: Duration = Duration::from_millis(20);

#[tokio::test]
async fn test_concurrent_acquire_only_one_wins() {
    init_tracing();
    let a = SimNode::new("A", &["A", "B"]);
    let b = SimNode::new("B", &["A", "B"]);
    let pump = spawn_pump(vec![a.store.clone(), b.store.clone()], PUMP_PERIOD);

    let timeout = Some(Duration::from_secs(3));
    let (got_a, got_b) = tokio::join!(
        a.locks.acquire("A", "x", timeout),
        b.locks.acquire("B", "x", timeout),
    );
    pump.abort();

    assert!(
        got_a.is_some() ^ got_b.is_some(),
        "exactly one node must acquire the lock (A: {got_a:?}, B: {got_b:?})"
    );
    let (winner, id) = match (&got_a, &got_b) {
        (Some(id), None) => (&a, id),
        (None, Some(id)) => (&b, id),
        _ => unreachable!(),
    };
    assert!(winner.locks.accepted("x", id));
}

#[tokio::test]
async fn test_acquire_then_release_lets_the_peer_acquire() {
    init_tracing();
    let a = SimNode::new("A", &["A", "B"]);
    let b = SimNode::new("B", &["A", "B"]);
    let pump = spawn_pump(vec![a.store.clone(), b.store.clone()], PUMP_PERIOD);

    let id = a
        .locks
        .acquire("A", "x", Some(Duration::from_secs(3)))
        .await
        .expect("A should acquire an uncontended lock");
    a.locks
        .release_and_wait("x", &id, Some(Duration::from_secs(3)), false)
        .await;
    assert!(!b.store.local().locks.contains_key("x"));

    let id_b = b.locks.acquire("B", "x", Some(Duration::from_secs(3))).await;
    pump.abort();
    assert!(id_b.is_some());
    assert_ne!(id_b.as_deref(), Some(id.as_str()));
}

#[tokio::test]
async fn test_acquire_times_out_without_gossip() {
    init_tracing();
    let a = SimNode::new("A", &["A", "B"]);
    // B never gossips: its missing data blocks acceptance.
    let started = tokio::time::Instant::now();
    let limit = Duration::from_secs(1);
    let got = a.locks.acquire("A", "x", Some(limit)).await;
    let elapsed = started.elapsed();
    assert!(got.is_none());
    assert!(elapsed >= limit);
    assert!(
        elapsed < limit + LOCK_POLL_INTERVAL + Duration::from_millis(500),
        "acquire gave up after {elapsed:?}"
    );
    assert!(!a.store.local().locks.contains_key("x"));
}

#[tokio::test]
async fn test_acquire_rejects_non_member_requester() {
    let a = SimNode::new("A", &["A"]);
    assert!(a.locks.acquire("Z", "x", Some(Duration::from_millis(200))).await.is_none());
}

#[tokio::test]
async fn test_join_extends_membership() {
    let dir = tempdir().unwrap();
    let state = test_state(test_config("node1", &["node1", "node2"], dir.path()));
    let node2 = SimNode::new("node2", &["node1", "node2"]);
    exchange(&[state.store.clone(), node2.store.clone()]);
    let pump = spawn_pump(vec![state.store.clone(), node2.store.clone()], PUMP_PERIOD);

    let response = state.join.join("nodeC").await.expect("join should succeed");

    assert_eq!(response["cluster"]["nodes"], Value::from("node1 node2 nodeC"));
    assert_eq!(response["cluster"]["name"], Value::from("test"));
    assert!(response["cluster"].get("secret").is_none());
    assert_eq!(state.store.members().len(), 3);
    assert_eq!(state.config.lock().await.cluster.nodes.len(), 3);
    assert!(!state.store.local().locks.contains_key(JOIN_LOCK));

    // The new member reaches node2 through gossip.
    let store2 = node2.store.clone();
    let learned = super::test_helpers::eventually(Duration::from_secs(2), || {
        store2.is_member("nodeC")
    })
    .await;
    pump.abort();
    assert!(learned);
}

#[tokio::test]
async fn test_rejoin_keeps_membership() {
    let dir = tempdir().unwrap();
    let state = test_state(test_config("node1", &["node1", "node2"], dir.path()));
    let node2 = SimNode::new("node2", &["node1", "node2"]);
    let pump = spawn_pump(vec![state.store.clone(), node2.store.clone()], PUMP_PERIOD);

    let response = state.join.join("node2").await.unwrap();
    pump.abort();

    assert_eq!(response["cluster"]["nodes"], Value::from("node1 node2"));
    assert_eq!(state.store.members(), vec!["node1", "node2"]);
}

#[tokio::test]
async fn test_join_fails_when_lock_not_acquired() {
    let dir = tempdir().unwrap();
    let mut config = test_config("node1", &["node1", "node2"], dir.path());
    config.monitor.join_lock_timeout = Duration::from_millis(600);
    let state = test_state(config);

    // node2 never reports: the join lock cannot be accepted.
    let err = state.join.join("nodeC").await.unwrap_err();
    assert!(matches!(err, hagent::AgentError::LockNotAcquired(_)));
    assert_eq!(state.store.members().len(), 2);
}

#[tokio::test]
async fn test_join_persists_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("hagent.toml");
    let config = test_config("node1", &["node1"], dir.path());
    config.save(&path).unwrap();
    let state = hagent::core::state::AgentState::initialize(config, Some(path.clone()), None)
        .unwrap();

    state.join.join("node2").await.unwrap();

    let saved = hagent::config::Config::from_file(&path).unwrap();
    assert_eq!(saved.cluster.nodes, vec!["node1", "node2"]);
}
