use std::time::Duration;

use async_trait::async_trait;
use controlplane_core::ControlPlaneResult;
use tracing::debug;

use crate::models::Task;

/// 实际执行任务的一方
///
/// 调度器在释放自身锁之后调用，返回错误即视为一次执行失败。
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &Task, executor_id: &str) -> ControlPlaneResult<()>;
}

/// 默认执行器：按配置睡眠一段时间后成功
#[derive(Debug, Clone, Default)]
pub struct SimulatedRunner {
    work: Duration,
}

impl SimulatedRunner {
    pub fn new(work: Duration) -> Self {
        Self { work }
    }
}

#[async_trait]
impl TaskRunner for SimulatedRunner {
    async fn run(&self, task: &Task, executor_id: &str) -> ControlPlaneResult<()> {
        debug!("执行器 {} 模拟执行任务 {}", executor_id, task.id);
        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_runner_succeeds() {
        let runner = SimulatedRunner::new(Duration::from_millis(1));
        let task = Task::new("t1", 0);
        assert!(runner.run(&task, "e1").await.is_ok());
    }
}
