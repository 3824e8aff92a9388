// tests/integration/orchestration_test.rs

use super::test_helpers::{FakeResource, SimNode, eventually, exchange, init_tracing};
use hagent::core::cluster::{GlobalExpect, LocalExpect, ServiceStatus, now_ms};
use hagent::core::freeze::FreezeGate;
use hagent::core::monitor::{NodeMonitor, NodeMonitorRequest};
use hagent::core::orchestrator::{Decision, Orchestrator, OrchestratorSettings, Services};
use hagent::core::resource::{Orchestrate, Resource, ResourceStatus, Service};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const SVC: &str = "prod/web";

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        interval: Duration::from_secs(1),
        action_timeout: Duration::from_secs(5),
        max_restarts: 2,
        peer_timeout: Duration::from_secs(15),
    }
}

fn ha_service(nodes: &[&str], resource: Arc<FakeResource>) -> Service {
    Service::new(
        SVC,
        nodes.iter().map(|n| n.to_string()).collect(),
        Orchestrate::Ha,
        vec![resource as Arc<dyn Resource>],
    )
}

fn orchestrator(node: &SimNode, var_dir: &Path, service: Service) -> Arc<Orchestrator> {
    let mut services = Services::new();
    services.insert(service.path.clone(), Arc::new(service));
    Arc::new(Orchestrator::new(
        node.store.clone(),
        node.wake.clone(),
        Arc::new(services),
        var_dir.to_path_buf(),
        settings(),
    ))
}

fn set_instance(node: &SimNode, avail: ResourceStatus, local_expect: LocalExpect) {
    node.store.update_local(|local| {
        let instance = local.services.entry(SVC.to_string()).or_default();
        instance.avail = avail;
        instance.local_expect = local_expect;
    });
}

#[tokio::test]
async fn test_frozen_node_performs_no_actions() {
    init_tracing();
    let dir = tempdir().unwrap();
    let node = SimNode::new("node1", &["node1"]);
    FreezeGate::node(dir.path()).node_freeze().unwrap();
    let fake = FakeResource::new("app#1", ResourceStatus::Down);
    let orch = orchestrator(&node, dir.path(), ha_service(&["node1"], fake.clone()));
    // Expected up, observed down: an unfrozen node would restart it.
    set_instance(&node, ResourceStatus::Down, LocalExpect::Started);

    let decisions = orch.reconcile_once();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(decisions.is_empty(), "got {decisions:?}");
    assert_eq!(orch.actions_spawned(), 0);
    assert_eq!(fake.actions(), 0);
    assert!(node.store.local().monitor.frozen.is_some());
}

#[tokio::test]
async fn test_frozen_node_still_executes_explicit_shutdown() {
    init_tracing();
    let dir = tempdir().unwrap();
    let node = SimNode::new("node1", &["node1"]);
    FreezeGate::node(dir.path()).node_freeze().unwrap();
    let fake = FakeResource::new("app#1", ResourceStatus::Up);
    let orch = orchestrator(&node, dir.path(), ha_service(&["node1"], fake.clone()));
    set_instance(&node, ResourceStatus::Up, LocalExpect::Shutdown);

    let decisions = orch.reconcile_once();
    assert_eq!(decisions, vec![(SVC.to_string(), Decision::Stop)]);

    let store = node.store.clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            store.local().services[SVC].local_expect == LocalExpect::Unset
        })
        .await
    );
    assert_eq!(fake.stops.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(node.store.local().services[SVC].avail, ResourceStatus::Down);
}

#[tokio::test]
async fn test_leader_starts_down_ha_service() {
    init_tracing();
    let dir = tempdir().unwrap();
    let node = SimNode::new("node1", &["node1"]);
    let fake = FakeResource::new("app#1", ResourceStatus::Down);
    let orch = orchestrator(&node, dir.path(), ha_service(&["node1"], fake.clone()));
    set_instance(&node, ResourceStatus::Down, LocalExpect::Unset);

    let decisions = orch.reconcile_once();
    assert_eq!(decisions, vec![(SVC.to_string(), Decision::Start)]);

    let store = node.store.clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            let local = store.local();
            let instance = &local.services[SVC];
            instance.avail == ResourceStatus::Up && instance.status == ServiceStatus::Idle
        })
        .await
    );
    assert_eq!(node.store.local().services[SVC].local_expect, LocalExpect::Started);
    assert!(!orch.in_flight(SVC));

    // Up now: nothing else to do.
    assert!(orch.reconcile_once().is_empty());
    assert_eq!(fake.starts.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_start_is_not_retried() {
    init_tracing();
    let dir = tempdir().unwrap();
    let node = SimNode::new("node1", &["node1"]);
    let fake = FakeResource::failing("app#1");
    let orch = orchestrator(&node, dir.path(), ha_service(&["node1"], fake.clone()));
    set_instance(&node, ResourceStatus::Down, LocalExpect::Unset);

    orch.reconcile_once();
    let store = node.store.clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            store.local().services[SVC].status == ServiceStatus::StartFailed
        })
        .await
    );
    assert!(eventually(Duration::from_secs(1), || !orch.in_flight(SVC)).await);

    assert!(orch.reconcile_once().is_empty());
    assert_eq!(fake.starts.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_restart_budget_is_enforced() {
    init_tracing();
    let dir = tempdir().unwrap();
    let node = SimNode::new("node1", &["node1"]);
    let fake = FakeResource::new("app#1", ResourceStatus::Down);
    let orch = orchestrator(&node, dir.path(), ha_service(&["node1"], fake.clone()));
    set_instance(&node, ResourceStatus::Down, LocalExpect::Started);
    node.store.update_local(|local| {
        local.services.get_mut(SVC).unwrap().restarts = 2;
    });

    let decisions = orch.reconcile_once();

    assert_eq!(decisions, vec![(SVC.to_string(), Decision::GiveUp)]);
    let local = node.store.local();
    assert_eq!(local.services[SVC].status, ServiceStatus::StartFailed);
    assert_eq!(local.services[SVC].local_expect, LocalExpect::Unset);
    assert_eq!(fake.actions(), 0);
}

#[tokio::test]
async fn test_restart_counts_attempts() {
    init_tracing();
    let dir = tempdir().unwrap();
    let node = SimNode::new("node1", &["node1"]);
    let fake = FakeResource::new("app#1", ResourceStatus::Down);
    let orch = orchestrator(&node, dir.path(), ha_service(&["node1"], fake.clone()));
    set_instance(&node, ResourceStatus::Down, LocalExpect::Started);

    let decisions = orch.reconcile_once();

    assert_eq!(decisions, vec![(SVC.to_string(), Decision::Restart)]);
    assert_eq!(node.store.local().services[SVC].restarts, 1);
    let store = node.store.clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            store.local().services[SVC].avail == ResourceStatus::Up
        })
        .await
    );
}

#[tokio::test]
async fn test_restart_budget_resets_after_successful_restart() {
    init_tracing();
    let dir = tempdir().unwrap();
    let node = SimNode::new("node1", &["node1"]);
    let fake = FakeResource::new("app#1", ResourceStatus::Down);
    let orch = orchestrator(&node, dir.path(), ha_service(&["node1"], fake.clone()));
    let store = node.store.clone();

    // Three separate crashes, each followed by a successful restart.
    for crash in 1..=3 {
        fake.set_status(ResourceStatus::Down);
        set_instance(&node, ResourceStatus::Down, LocalExpect::Started);

        let decisions = orch.reconcile_once();

        assert_eq!(
            decisions,
            vec![(SVC.to_string(), Decision::Restart)],
            "crash {crash}"
        );
        assert!(
            eventually(Duration::from_secs(2), || {
                store.local().services[SVC].avail == ResourceStatus::Up && !orch.in_flight(SVC)
            })
            .await
        );
        assert_eq!(store.local().services[SVC].restarts, 0, "crash {crash}");
    }

    assert_eq!(fake.starts.load(std::sync::atomic::Ordering::SeqCst), 3);
    assert_ne!(store.local().services[SVC].status, ServiceStatus::StartFailed);
}

#[tokio::test]
async fn test_stopped_ha_service_stays_down_after_target_clears() {
    init_tracing();
    let dir = tempdir().unwrap();
    let node = SimNode::new("node1", &["node1"]);
    let fake = FakeResource::new("app#1", ResourceStatus::Up);
    let orch = orchestrator(&node, dir.path(), ha_service(&["node1"], fake.clone()));
    set_instance(&node, ResourceStatus::Up, LocalExpect::Started);
    node.store.update_local(|local| {
        let instance = local.services.get_mut(SVC).unwrap();
        instance.global_expect = GlobalExpect::Stopped;
        instance.global_expect_updated = now_ms();
    });

    assert_eq!(
        orch.reconcile_once(),
        vec![(SVC.to_string(), Decision::Stop)]
    );
    let store = node.store.clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            store.local().services[SVC].avail == ResourceStatus::Down && !orch.in_flight(SVC)
        })
        .await
    );

    for _ in 0..10 {
        orch.reconcile_once();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let local = node.store.local();
    assert_eq!(local.services[SVC].global_expect, GlobalExpect::Unset);
    assert!(FreezeGate::service(dir.path(), SVC).frozen(true).is_some());
    assert!(local.services[SVC].frozen.is_some());
    assert_eq!(fake.starts.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(fake.stops.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_started_target_thaws_frozen_service() {
    init_tracing();
    let dir = tempdir().unwrap();
    let node = SimNode::new("node1", &["node1"]);
    FreezeGate::service(dir.path(), SVC).freeze().unwrap();
    let fake = FakeResource::new("app#1", ResourceStatus::Down);
    let orch = orchestrator(&node, dir.path(), ha_service(&["node1"], fake.clone()));
    set_instance(&node, ResourceStatus::Down, LocalExpect::Unset);
    assert!(orch.reconcile_once().is_empty());

    node.store.update_local(|local| {
        let instance = local.services.get_mut(SVC).unwrap();
        instance.global_expect = GlobalExpect::Started;
        instance.global_expect_updated = now_ms();
    });
    orch.reconcile_once();
    assert!(FreezeGate::service(dir.path(), SVC).frozen(true).is_none());

    assert_eq!(
        orch.reconcile_once(),
        vec![(SVC.to_string(), Decision::Start)]
    );
    let store = node.store.clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            store.local().services[SVC].avail == ResourceStatus::Up && !orch.in_flight(SVC)
        })
        .await
    );
    orch.reconcile_once();
    assert_eq!(store.local().services[SVC].global_expect, GlobalExpect::Unset);
    assert_eq!(fake.starts.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_follower_waits_for_leader() {
    init_tracing();
    let dir1 = tempdir().unwrap();
    let dir2 = tempdir().unwrap();
    let node1 = SimNode::new("node1", &["node1", "node2"]);
    let node2 = SimNode::new("node2", &["node1", "node2"]);
    let fake2 = FakeResource::new("app#1", ResourceStatus::Down);
    let orch2 = orchestrator(&node2, dir2.path(), ha_service(&["node1", "node2"], fake2.clone()));
    set_instance(&node2, ResourceStatus::Down, LocalExpect::Unset);

    // node1 has never reported: its state is unknown, so nobody starts.
    assert!(orch2.reconcile_once().is_empty());

    // node1 reports a healthy idle state: it is the leader.
    set_instance(&node1, ResourceStatus::Down, LocalExpect::Unset);
    exchange(&[node1.store.clone(), node2.store.clone()]);
    assert!(orch2.reconcile_once().is_empty());

    // node1 is frozen: leadership moves to node2.
    FreezeGate::node(dir1.path()).node_freeze().unwrap();
    let frozen = FreezeGate::node(dir1.path()).node_frozen();
    node1.store.update_local(|local| local.monitor.frozen = frozen);
    exchange(&[node1.store.clone(), node2.store.clone()]);
    assert_eq!(
        orch2.reconcile_once(),
        vec![(SVC.to_string(), Decision::Start)]
    );
}

#[tokio::test]
async fn test_no_start_when_up_elsewhere() {
    init_tracing();
    let dir2 = tempdir().unwrap();
    let node1 = SimNode::new("node1", &["node1", "node2"]);
    let node2 = SimNode::new("node2", &["node1", "node2"]);
    let fake2 = FakeResource::new("app#1", ResourceStatus::Down);
    // node2 first in the placement list: it would lead.
    let orch2 = orchestrator(&node2, dir2.path(), ha_service(&["node2", "node1"], fake2));
    set_instance(&node2, ResourceStatus::Down, LocalExpect::Unset);
    set_instance(&node1, ResourceStatus::Up, LocalExpect::Started);
    exchange(&[node1.store.clone(), node2.store.clone()]);

    assert!(orch2.reconcile_once().is_empty());
}

#[tokio::test]
async fn test_node_global_expect_propagates_and_clears() {
    init_tracing();
    let dir1 = tempdir().unwrap();
    let dir2 = tempdir().unwrap();
    let node1 = SimNode::new("node1", &["node1", "node2"]);
    let node2 = SimNode::new("node2", &["node1", "node2"]);
    let fake1 = FakeResource::new("app#1", ResourceStatus::Down);
    let fake2 = FakeResource::new("app#1", ResourceStatus::Down);
    let orch1 = orchestrator(&node1, dir1.path(), ha_service(&["node1", "node2"], fake1));
    let orch2 = orchestrator(&node2, dir2.path(), ha_service(&["node1", "node2"], fake2));
    let stores = [node1.store.clone(), node2.store.clone()];

    let monitor1 = NodeMonitor::new(
        node1.store.clone(),
        node1.wake.clone(),
        FreezeGate::node(dir1.path()),
    );
    let outcome = monitor1
        .set(NodeMonitorRequest {
            global_expect: Some("frozen".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert!(outcome.is_applied());

    exchange(&stores);
    orch2.reconcile_once();
    assert!(FreezeGate::node(dir2.path()).node_frozen().is_some());
    let requested_at = node1.store.local().monitor.global_expect_updated;
    assert_eq!(
        node2.store.local().monitor.global_expect_updated,
        requested_at
    );

    exchange(&stores);
    orch1.reconcile_once();
    assert!(FreezeGate::node(dir1.path()).node_frozen().is_some());
    assert_eq!(node1.store.local().monitor.global_expect, GlobalExpect::Unset);

    exchange(&stores);
    orch2.reconcile_once();
    assert_eq!(node2.store.local().monitor.global_expect, GlobalExpect::Unset);
    assert!(FreezeGate::node(dir2.path()).node_frozen().is_some());
}
