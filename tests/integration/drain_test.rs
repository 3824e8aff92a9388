// tests/integration/drain_test.rs

use super::test_helpers::{eventually, service_config, test_config, test_state};
use hagent::AgentError;
use hagent::core::cluster::{LocalExpect, NodeStatus};
use hagent::core::monitor::MonitorOutcome;
use hagent::core::resource::ResourceStatus;
use std::time::Duration;
use tempfile::tempdir;
use tokio::time::Instant;

#[tokio::test]
async fn test_drain_times_out_when_shutdown_never_completes() {
    let dir = tempdir().unwrap();
    let mut config = test_config("node1", &["node1"], dir.path());
    config.services.push(service_config("svc1"));
    let state = test_state(config);

    // No orchestration loop runs, so the shutdown stays pending forever.
    let started = Instant::now();
    let result = state
        .drainer
        .drain(NodeStatus::Draining, true, Some(Duration::from_secs(2)))
        .await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(AgentError::Timeout(_))), "got {result:?}");
    assert!(elapsed >= Duration::from_secs(2), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "returned late: {elapsed:?}");

    // Nothing is rolled back.
    let local = state.store.local();
    assert_eq!(local.monitor.status, NodeStatus::Draining);
    assert_eq!(local.services["svc1"].local_expect, LocalExpect::Shutdown);
    assert!(state.node_gate.node_frozen().is_some());
}

#[tokio::test]
async fn test_drain_without_wait_returns_immediately() {
    let dir = tempdir().unwrap();
    let mut config = test_config("node1", &["node1"], dir.path());
    config.services.push(service_config("svc1"));
    let state = test_state(config);

    let outcome = tokio_test::assert_ready!(tokio_test::task::spawn(
        state.drainer.drain(NodeStatus::Draining, false, None)
    )
    .poll());

    assert_eq!(outcome.unwrap(), MonitorOutcome::Applied);
    assert_eq!(state.drainer.pending_shutdowns(), vec!["svc1".to_string()]);
}

#[tokio::test]
async fn test_drain_skips_services_already_down() {
    let dir = tempdir().unwrap();
    let mut config = test_config("node1", &["node1"], dir.path());
    config.services.push(service_config("up"));
    config.services.push(service_config("down"));
    let state = test_state(config);
    state.store.update_local(|local| {
        local.services.get_mut("up").unwrap().avail = ResourceStatus::Up;
        local.services.get_mut("down").unwrap().avail = ResourceStatus::Down;
    });

    state
        .drainer
        .drain(NodeStatus::Draining, false, None)
        .await
        .unwrap();

    assert_eq!(state.drainer.pending_shutdowns(), vec!["up".to_string()]);
}

#[tokio::test]
async fn test_drain_completes_through_the_orchestration_loop() {
    let dir = tempdir().unwrap();
    let mut config = test_config("node1", &["node1"], dir.path());
    config.services.push(service_config("svc1"));
    let state = test_state(config);
    state.store.update_local(|local| {
        local.services.get_mut("svc1").unwrap().avail = ResourceStatus::Up;
    });

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let loop_handle = tokio::spawn(state.orchestrator.clone().run(shutdown_tx.subscribe()));

    // The service has no resources: stopping it succeeds and its status
    // aggregates to n/a, which a worker records before clearing the shutdown.
    let result = state
        .drainer
        .drain(NodeStatus::Draining, true, Some(Duration::from_secs(5)))
        .await;
    assert_eq!(result.unwrap(), MonitorOutcome::Applied);
    assert_eq!(
        state.store.local().services["svc1"].local_expect,
        LocalExpect::Unset
    );

    // The pass woken by the worker returns the node to idle.
    let store = state.store.clone();
    let idle = eventually(Duration::from_secs(2), || {
        store.local().monitor.status == NodeStatus::Idle
    })
    .await;
    shutdown_tx.send(()).unwrap();
    loop_handle.await.unwrap().unwrap();
    assert!(idle);
}

#[tokio::test]
async fn test_second_drain_does_not_restart() {
    let dir = tempdir().unwrap();
    let mut config = test_config("node1", &["node1"], dir.path());
    config.services.push(service_config("svc1"));
    let state = test_state(config);

    state
        .drainer
        .drain(NodeStatus::Draining, false, None)
        .await
        .unwrap();
    let again = state
        .drainer
        .drain(NodeStatus::Draining, false, None)
        .await
        .unwrap();

    assert!(matches!(again, MonitorOutcome::AlreadySatisfied(_)));
}

#[tokio::test]
async fn test_drain_rejects_non_drain_status() {
    let dir = tempdir().unwrap();
    let state = test_state(test_config("node1", &["node1"], dir.path()));
    let err = state
        .drainer
        .drain(NodeStatus::Maintenance, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::InvalidRequest(_)));
}
