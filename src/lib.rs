//! 分布式控制平面
//!
//! 把任务调度器、负载均衡器、背压治理器和共识协调器组装成一个进程。
//! 组件之间只通过 `controlplane_core` 中的接口交互。

pub mod app;
pub mod shutdown;

use async_trait::async_trait;
use controlplane_balancer::LoadBalancer;
use controlplane_core::{ActionSink, ControlPlaneResult, PressureSource};
use controlplane_scheduler::TaskScheduler;
use tracing::info;

pub use app::Application;
pub use shutdown::ShutdownManager;

/// 把治理器的采样和动作路由到对应组件
///
/// `flow:<id>` 由调度器处理，`resource:<id>` 由负载均衡器处理。
#[derive(Clone)]
pub struct PressureRouter {
    scheduler: TaskScheduler,
    balancer: LoadBalancer,
}

impl PressureRouter {
    pub fn new(scheduler: TaskScheduler, balancer: LoadBalancer) -> Self {
        Self {
            scheduler,
            balancer,
        }
    }
}

#[async_trait]
impl PressureSource for PressureRouter {
    async fn flow_pressure(&self, flow_id: &str) -> ControlPlaneResult<f64> {
        self.scheduler.flow_pressure(flow_id).await
    }

    async fn resource_pressure(&self, resource_id: &str) -> ControlPlaneResult<f64> {
        self.balancer.resource_pressure(resource_id).await
    }
}

/// 负载均衡器读取调度器状态的只读视图
///
/// `resource:<id>` 对应执行器的槽位占用率，`flow:<id>` 对应流压力。
/// 节点通过 `NodeSpec::load_source` 绑定到其中一个目标。
#[derive(Clone)]
pub struct SchedulerLoadFeed {
    scheduler: TaskScheduler,
}

impl SchedulerLoadFeed {
    pub fn new(scheduler: TaskScheduler) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl PressureSource for SchedulerLoadFeed {
    async fn flow_pressure(&self, flow_id: &str) -> ControlPlaneResult<f64> {
        self.scheduler.flow_pressure(flow_id).await
    }

    async fn resource_pressure(&self, resource_id: &str) -> ControlPlaneResult<f64> {
        self.scheduler.executor_pressure(resource_id).await
    }
}

#[async_trait]
impl ActionSink for PressureRouter {
    async fn throttle_flow(&self, flow_id: &str, rate: f64) -> ControlPlaneResult<()> {
        self.scheduler.throttle_flow(flow_id, rate).await
    }

    async fn scale_resource(&self, resource_id: &str, factor: f64) -> ControlPlaneResult<()> {
        self.balancer.scale_resource(resource_id, factor).await
    }

    async fn notify(&self, channel: &str, message: &str) -> ControlPlaneResult<()> {
        info!(channel = %channel, "背压告警: {}", message);
        Ok(())
    }
}
