//! 任务调度器
//!
//! 按优先级准入任务，派发到负载最低的执行器，失败后按退避策略重试。

pub mod models;
pub mod retry_service;
pub mod runner;
pub mod scheduler;
pub mod strategies;

pub use models::{
    DispatchReport, Executor, ExecutorSpec, Flow, FlowStatus, LatencyStats, QueueSnapshot,
    QueueStats, SchedulerMetrics, Task, TaskQueue, TaskStatus,
};
pub use retry_service::RetryPolicy;
pub use runner::{SimulatedRunner, TaskRunner};
pub use scheduler::TaskScheduler;
