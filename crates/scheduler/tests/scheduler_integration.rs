use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use controlplane_config::SchedulerConfig;
use controlplane_core::{ControlPlaneError, ErrorKind};
use controlplane_scheduler::{ExecutorSpec, TaskScheduler, TaskStatus};
use controlplane_testing_utils::{MockRunner, RecordingMetricsSink, TaskBuilder, TestEnv};

fn scheduler_with(
    config: SchedulerConfig,
    runner: MockRunner,
) -> (TaskScheduler, RecordingMetricsSink) {
    let (_, clock) = TestEnv::manual_clock();
    let metrics = RecordingMetricsSink::default();
    let scheduler = TaskScheduler::new(config, clock)
        .with_runner(Arc::new(runner))
        .with_metrics_sink(Arc::new(metrics.clone()));
    (scheduler, metrics)
}

#[tokio::test]
async fn test_dispatch_respects_priority_and_capacity() {
    let mut runner = MockRunner::new();
    runner.expect_run().times(3).returning(|_, _| Ok(()));
    let (scheduler, metrics) = scheduler_with(SchedulerConfig::default(), runner);

    scheduler
        .register_executor(ExecutorSpec::new("e1", 2))
        .await
        .unwrap();
    scheduler
        .schedule(TaskBuilder::new("low").with_priority(2).build())
        .await
        .unwrap();
    scheduler
        .schedule(TaskBuilder::new("high").with_priority(0).build())
        .await
        .unwrap();
    scheduler
        .schedule(TaskBuilder::new("mid").with_priority(1).build())
        .await
        .unwrap();

    let report = scheduler.execute().await.unwrap();
    assert_eq!(report.dispatched, vec!["high", "mid"]);
    assert_eq!(report.completed.len(), 2);

    let report = scheduler.execute().await.unwrap();
    assert_eq!(report.dispatched, vec!["low"]);

    let stats = scheduler.metrics().await;
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.success_rate, 1.0);
    assert_eq!(scheduler.executor("e1").await.unwrap().load, 0);
    assert_eq!(metrics.points_for("scheduler").len(), 2);
}

#[tokio::test]
async fn test_flaky_task_recovers_on_retry() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let mut runner = MockRunner::new();
    runner.expect_run().returning(move |task, _| {
        if task.id == "flaky" && counter.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(ControlPlaneError::internal("连接被重置"));
        }
        Ok(())
    });
    let (scheduler, _) = scheduler_with(SchedulerConfig::default(), runner);
    scheduler
        .register_executor(ExecutorSpec::new("e1", 4))
        .await
        .unwrap();
    scheduler
        .schedule(TaskBuilder::new("flaky").build())
        .await
        .unwrap();

    let report = scheduler.execute().await.unwrap();
    assert_eq!(report.retried, vec!["flaky"]);
    let task = scheduler.task("flaky").await.unwrap();
    assert_eq!(task.status, TaskStatus::Retry);
    assert_eq!(task.retries, 1);

    let report = scheduler.execute().await.unwrap();
    assert_eq!(report.completed, vec!["flaky"]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_parent_fails_dependents() {
    let mut runner = MockRunner::new();
    runner
        .expect_run()
        .returning(|task, _| match task.id.as_str() {
            "parent" => Err(ControlPlaneError::internal("退出码 1")),
            _ => Ok(()),
        });
    let config = SchedulerConfig {
        retry_limit: 1,
        ..SchedulerConfig::default()
    };
    let (scheduler, _) = scheduler_with(config, runner);
    scheduler
        .register_executor(ExecutorSpec::new("e1", 4))
        .await
        .unwrap();
    scheduler
        .schedule(TaskBuilder::new("parent").build())
        .await
        .unwrap();
    scheduler
        .schedule(TaskBuilder::new("child").with_dependency("parent").build())
        .await
        .unwrap();

    let report = scheduler.execute().await.unwrap();
    assert_eq!(report.dispatched, vec!["parent"]);
    assert_eq!(report.failed, vec!["parent"]);

    let report = scheduler.execute().await.unwrap();
    assert_eq!(report.failed, vec!["child"]);
    let child = scheduler.task("child").await.unwrap();
    assert_eq!(child.status, TaskStatus::Failed);
    assert!(child.last_error.is_some());
    assert_eq!(scheduler.metrics().await.success_rate, 0.0);
}

#[tokio::test]
async fn test_unknown_flow_is_rejected() {
    let runner = MockRunner::new();
    let (scheduler, _) = scheduler_with(SchedulerConfig::default(), runner);
    let err = scheduler
        .schedule(TaskBuilder::new("t").with_flow("missing").build())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
