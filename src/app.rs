use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use controlplane_balancer::LoadBalancer;
use controlplane_config::AppConfig;
use controlplane_consensus::{ConflictResolver, ConsensusCoordinator, LoggingActionExecutor};
use controlplane_core::{Clock, ControlPlaneResult, MetricsSink, SystemClock};
use controlplane_governor::BackpressureGovernor;
use controlplane_observability::{FanoutMetricsSink, MetricsCollector, RecordingMetricsSink};
use controlplane_scheduler::{SimulatedRunner, TaskScheduler};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{PressureRouter, SchedulerLoadFeed};

/// 主应用程序
///
/// 持有四个组件，并为每个启用的组件运行一个周期循环。
#[derive(Clone)]
pub struct Application {
    config: AppConfig,
    scheduler: TaskScheduler,
    balancer: LoadBalancer,
    governor: BackpressureGovernor,
    coordinator: ConsensusCoordinator,
    resolver: ConflictResolver,
    recorder: RecordingMetricsSink,
}

impl Application {
    pub fn new(config: AppConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// 使用指定时钟组装各组件
    pub fn with_clock(config: AppConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        info!("初始化控制平面组件");

        let recorder = RecordingMetricsSink::new(config.metrics.history_size);
        let mut fanout = FanoutMetricsSink::new().with_sink(Arc::new(recorder.clone()));
        if config.metrics.enabled {
            fanout = fanout.with_sink(Arc::new(MetricsCollector::new()));
        }
        let metrics: Arc<dyn MetricsSink> = Arc::new(fanout);

        let scheduler = TaskScheduler::new(config.scheduler.clone(), clock.clone())
            .with_runner(Arc::new(SimulatedRunner::new(
                config.scheduler.simulated_work(),
            )))
            .with_metrics_sink(metrics.clone());

        let balancer = LoadBalancer::new(config.balancer.clone(), clock.clone())
            .with_metrics_sink(metrics.clone())
            .with_load_feed(Arc::new(SchedulerLoadFeed::new(scheduler.clone())));

        let router = Arc::new(PressureRouter::new(scheduler.clone(), balancer.clone()));
        let governor = BackpressureGovernor::new(
            config.governor.clone(),
            clock.clone(),
            router.clone(),
            router,
        )
        .with_metrics_sink(metrics.clone());

        let resolver = ConflictResolver::new(
            config.resolver.clone(),
            clock.clone(),
            Arc::new(LoggingActionExecutor),
        )
        .with_metrics_sink(metrics.clone());

        let coordinator = ConsensusCoordinator::new(
            config.consensus.clone(),
            clock,
            Arc::new(resolver.clone()),
        )
        .with_metrics_sink(metrics);

        Ok(Self {
            config,
            scheduler,
            balancer,
            governor,
            coordinator,
            resolver,
            recorder,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    pub fn governor(&self) -> &BackpressureGovernor {
        &self.governor
    }

    pub fn coordinator(&self) -> &ConsensusCoordinator {
        &self.coordinator
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    /// 进程内保留的最近指标点
    pub fn recorded_metrics(&self) -> &RecordingMetricsSink {
        &self.recorder
    }

    /// 运行所有启用的组件循环，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动控制平面");

        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        if self.config.scheduler.enabled {
            let scheduler = self.scheduler.clone();
            handles.push(spawn_loop(
                "scheduler",
                self.config.scheduler.execute_interval(),
                shutdown_rx.resubscribe(),
                move || {
                    let scheduler = scheduler.clone();
                    async move { scheduler.execute().await.map(|_| ()) }
                },
            ));
        }

        if self.config.balancer.enabled {
            let balancer = self.balancer.clone();
            handles.push(spawn_loop(
                "balancer",
                self.config.balancer.balance_interval(),
                shutdown_rx.resubscribe(),
                move || {
                    let balancer = balancer.clone();
                    async move { balancer.balance().await.map(|_| ()) }
                },
            ));
        }

        if self.config.governor.enabled {
            let governor = self.governor.clone();
            handles.push(spawn_loop(
                "governor",
                self.config.governor.monitor_interval(),
                shutdown_rx.resubscribe(),
                move || {
                    let governor = governor.clone();
                    async move { governor.monitor().await.map(|_| ()) }
                },
            ));
        }

        if self.config.consensus.enabled {
            let coordinator = self.coordinator.clone();
            handles.push(spawn_loop(
                "coordinator",
                self.config.consensus.coordinate_interval(),
                shutdown_rx.resubscribe(),
                move || {
                    let coordinator = coordinator.clone();
                    async move { coordinator.coordinate().await.map(|_| ()) }
                },
            ));
        }

        info!("已启动 {} 个组件循环", handles.len());

        let _ = shutdown_rx.recv().await;
        info!("控制平面收到关闭信号");

        for handle in handles {
            let _ = handle.await;
        }
        self.resolver.shutdown().await;

        info!("所有组件已停止");
        Ok(())
    }
}

/// 按固定间隔运行一个组件周期，单个周期失败只记录日志
fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
    mut cycle: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ControlPlaneResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        debug!("{} 循环启动，周期 {:?}", name, period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = cycle().await {
                        warn!("{} 周期失败: {}", name, e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("{} 循环收到关闭信号", name);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use controlplane_balancer::{NodeSpec, ResourceVector};
    use controlplane_core::ManualClock;

    #[tokio::test]
    async fn test_application_wires_components() {
        let clock = ManualClock::default();
        let app = Application::with_clock(AppConfig::default(), Arc::new(clock)).unwrap();

        app.balancer()
            .register_node(NodeSpec::new("n1", ResourceVector::new(4.0, 8.0, 0.0, 0.0)))
            .await
            .unwrap();
        app.balancer().balance().await.unwrap();

        assert_eq!(app.recorded_metrics().points_for("balancer").len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let app = Application::new(AppConfig::default()).unwrap();
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn({
            let app = app.clone();
            async move { app.run(rx).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.unwrap().unwrap().is_ok());
    }
}
