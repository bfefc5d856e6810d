use std::sync::Arc;
use std::time::Duration;

use controlplane_balancer::{AllocationStatus, LoadBalancer, NodeStatus};
use controlplane_config::BalancerConfig;
use controlplane_core::ErrorKind;
use controlplane_testing_utils::{
    ManualClock, NodeBuilder, RecordingMetricsSink, StaticPressureSource, TestAssertions, TestEnv,
    WorkloadBuilder,
};

async fn cluster(nodes: &[&str]) -> (LoadBalancer, ManualClock, RecordingMetricsSink) {
    let (clock, shared) = TestEnv::manual_clock();
    let metrics = RecordingMetricsSink::default();
    let balancer = LoadBalancer::new(BalancerConfig::default(), shared)
        .with_metrics_sink(Arc::new(metrics.clone()));
    for id in nodes {
        balancer
            .register_node(NodeBuilder::new(id).build())
            .await
            .unwrap();
    }
    (balancer, clock, metrics)
}

#[tokio::test]
async fn test_single_workload_spreads_across_equal_nodes() {
    let (balancer, _, metrics) = cluster(&["n1", "n2", "n3"]).await;
    balancer
        .register_workload(
            WorkloadBuilder::new("web")
                .with_requirement(30.0, 10.0, 0.0, 0.0)
                .with_priority(1)
                .build(),
        )
        .await
        .unwrap();

    let report = balancer.balance().await.unwrap();
    assert_eq!(report.activated, 3);
    assert_eq!(report.failed, 0);

    let allocations = balancer.allocations_for("web").await;
    let mut nodes: Vec<String> = allocations.iter().map(|a| a.node_id.clone()).collect();
    nodes.sort();
    assert_eq!(nodes, vec!["n1", "n2", "n3"]);
    assert!(allocations
        .iter()
        .all(|a| a.status == AllocationStatus::Active));

    let total: f64 = allocations.iter().map(|a| a.percentage).sum();
    TestAssertions::assert_close(total, 1.0, 1e-6);

    let points = metrics.points_for("balancer");
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].get("active_allocations"), Some(3.0));
}

#[tokio::test]
async fn test_repeated_cycles_keep_one_live_allocation_set() {
    let (balancer, _, _) = cluster(&["n1", "n2"]).await;
    for (id, priority) in [("batch", 0), ("api", 5)] {
        balancer
            .register_workload(
                WorkloadBuilder::new(id)
                    .with_requirement(20.0, 20.0, 0.0, 0.0)
                    .with_priority(priority)
                    .build(),
            )
            .await
            .unwrap();
    }

    for _ in 0..3 {
        let report = balancer.balance().await.unwrap();
        assert!(report.workload_errors.is_empty());
    }

    assert_eq!(balancer.allocations_for("api").await.len(), 2);
    assert_eq!(balancer.allocations_for("batch").await.len(), 2);
    assert_eq!(balancer.metrics().await.active_allocations, 4);

    let completed = balancer
        .allocation_log()
        .await
        .into_iter()
        .filter(|a| a.status == AllocationStatus::Completed)
        .count();
    assert_eq!(completed, 8);
}

#[tokio::test]
async fn test_silent_node_is_excluded_from_next_cycle() {
    let (balancer, clock, _) = cluster(&["n1", "n2", "n3"]).await;
    balancer
        .register_workload(WorkloadBuilder::new("web").build())
        .await
        .unwrap();
    balancer.balance().await.unwrap();

    clock.advance(Duration::from_secs(50));
    balancer.heartbeat("n1", 0.3).await.unwrap();
    balancer.heartbeat("n2", 0.3).await.unwrap();
    clock.advance(Duration::from_secs(20));

    let report = balancer.balance().await.unwrap();
    assert_eq!(report.nodes_offline, vec!["n3"]);
    assert_eq!(
        balancer.node("n3").await.unwrap().status,
        NodeStatus::Offline
    );
    let allocations = balancer.allocations_for("web").await;
    assert_eq!(allocations.len(), 2);
    assert!(allocations.iter().all(|a| a.node_id != "n3"));
    assert_eq!(balancer.metrics().await.offline, 1);
}

#[tokio::test]
async fn test_oversized_workload_reports_resource_error() {
    let (balancer, _, _) = cluster(&["n1"]).await;
    balancer
        .register_workload(
            WorkloadBuilder::new("huge")
                .with_requirement(500.0, 10.0, 0.0, 0.0)
                .build(),
        )
        .await
        .unwrap();
    balancer
        .register_workload(WorkloadBuilder::new("small").build())
        .await
        .unwrap();

    let report = balancer.balance().await.unwrap();
    assert_eq!(report.workload_errors.len(), 1);
    assert_eq!(report.workload_errors[0].0, "huge");
    assert_eq!(balancer.allocations_for("small").await.len(), 1);
    assert!(balancer.workload("huge").await.unwrap().last_error.is_some());

    let err = balancer
        .register_workload(WorkloadBuilder::new("small").build())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_load_feed_keeps_bound_node_online() {
    let (clock, shared) = TestEnv::manual_clock();
    let feed = StaticPressureSource::new();
    feed.set("resource:exec-1", 0.8);
    let balancer =
        LoadBalancer::new(BalancerConfig::default(), shared).with_load_feed(Arc::new(feed.clone()));

    balancer
        .register_node(NodeBuilder::new("fed").with_load_source("resource:exec-1").build())
        .await
        .unwrap();
    balancer
        .register_node(NodeBuilder::new("silent").build())
        .await
        .unwrap();
    balancer
        .register_workload(WorkloadBuilder::new("web").build())
        .await
        .unwrap();

    // 两个节点都没有心跳，只有绑定压力源的节点保持在线
    clock.advance(Duration::from_secs(90));
    let report = balancer.balance().await.unwrap();
    assert_eq!(report.nodes_fed, vec!["fed"]);
    assert_eq!(report.nodes_offline, vec!["silent"]);

    let node = balancer.node("fed").await.unwrap();
    assert_eq!(node.status, NodeStatus::Busy);
    TestAssertions::assert_close(node.load, 0.8, 1e-9);

    // 负载回落后重新参与分配
    feed.set("resource:exec-1", 0.2);
    let report = balancer.balance().await.unwrap();
    assert!(report.workload_errors.is_empty());
    let allocations = balancer.allocations_for("web").await;
    assert_eq!(allocations.len(), 1);
    assert_eq!(allocations[0].node_id, "fed");
}

#[tokio::test]
async fn test_load_feed_error_falls_back_to_heartbeat_timeout() {
    let (clock, shared) = TestEnv::manual_clock();
    let feed = StaticPressureSource::new();
    let balancer =
        LoadBalancer::new(BalancerConfig::default(), shared).with_load_feed(Arc::new(feed));
    balancer
        .register_node(NodeBuilder::new("n1").with_load_source("flow:missing").build())
        .await
        .unwrap();

    let report = balancer.balance().await.unwrap();
    assert!(report.nodes_fed.is_empty());
    assert!(report.nodes_offline.is_empty());
    assert!(balancer
        .history()
        .await
        .iter()
        .any(|entry| entry.subject == "n1" && entry.event == "load_feed_failed"));

    clock.advance(Duration::from_secs(61));
    let report = balancer.balance().await.unwrap();
    assert_eq!(report.nodes_offline, vec!["n1"]);
}
