//! 组件接口的测试替身
//!
//! 内存实现用于需要累积状态的场景，mockall 生成的 mock 用于需要精确断言调用的场景。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use controlplane_consensus::{ActionExecutor, Conflict, StepOutcome, StrategyAction};
use controlplane_core::{ActionSink, ControlPlaneError, ControlPlaneResult, PressureSource};
use controlplane_scheduler::{Task, TaskRunner};
use mockall::mock;

/// 返回预设压力值的压力来源，未设置的目标返回 NotFound
#[derive(Debug, Clone, Default)]
pub struct StaticPressureSource {
    values: Arc<Mutex<HashMap<String, f64>>>,
}

impl StaticPressureSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// `target` 使用 `flow:<id>` 或 `resource:<id>` 形式
    pub fn set(&self, target: &str, value: f64) {
        self.values
            .lock()
            .unwrap()
            .insert(target.to_string(), value);
    }

    fn get(&self, target: String) -> ControlPlaneResult<f64> {
        self.values
            .lock()
            .unwrap()
            .get(&target)
            .copied()
            .ok_or_else(|| ControlPlaneError::not_found("压力目标", target))
    }
}

#[async_trait]
impl PressureSource for StaticPressureSource {
    async fn flow_pressure(&self, flow_id: &str) -> ControlPlaneResult<f64> {
        self.get(format!("flow:{flow_id}"))
    }

    async fn resource_pressure(&self, resource_id: &str) -> ControlPlaneResult<f64> {
        self.get(format!("resource:{resource_id}"))
    }
}

/// 记录到的治理动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedAction {
    Throttle { flow_id: String, rate: f64 },
    Scale { resource_id: String, factor: f64 },
    Notify { channel: String, message: String },
}

/// 记录所有动作的执行端
#[derive(Debug, Clone, Default)]
pub struct RecordingActionSink {
    actions: Arc<Mutex<Vec<RecordedAction>>>,
}

impl RecordingActionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<RecordedAction> {
        self.actions.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.actions.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.actions.lock().unwrap().clear();
    }
}

#[async_trait]
impl ActionSink for RecordingActionSink {
    async fn throttle_flow(&self, flow_id: &str, rate: f64) -> ControlPlaneResult<()> {
        self.actions.lock().unwrap().push(RecordedAction::Throttle {
            flow_id: flow_id.to_string(),
            rate,
        });
        Ok(())
    }

    async fn scale_resource(&self, resource_id: &str, factor: f64) -> ControlPlaneResult<()> {
        self.actions.lock().unwrap().push(RecordedAction::Scale {
            resource_id: resource_id.to_string(),
            factor,
        });
        Ok(())
    }

    async fn notify(&self, channel: &str, message: &str) -> ControlPlaneResult<()> {
        self.actions.lock().unwrap().push(RecordedAction::Notify {
            channel: channel.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }
}

mock! {
    pub Runner {}

    #[async_trait]
    impl TaskRunner for Runner {
        async fn run(&self, task: &Task, executor_id: &str) -> ControlPlaneResult<()>;
    }
}

mock! {
    pub Sink {}

    #[async_trait]
    impl ActionSink for Sink {
        async fn throttle_flow(&self, flow_id: &str, rate: f64) -> ControlPlaneResult<()>;
        async fn scale_resource(&self, resource_id: &str, factor: f64) -> ControlPlaneResult<()>;
        async fn notify(&self, channel: &str, message: &str) -> ControlPlaneResult<()>;
    }
}

mock! {
    pub Executor {}

    #[async_trait]
    impl ActionExecutor for Executor {
        async fn execute(
            &self,
            conflict: &Conflict,
            action: &StrategyAction,
        ) -> ControlPlaneResult<StepOutcome>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticPressureSource::new();
        source.set("flow:f1", 0.4);
        assert_eq!(source.flow_pressure("f1").await.unwrap(), 0.4);
        assert!(source.resource_pressure("f1").await.is_err());
    }

    #[tokio::test]
    async fn test_recording_sink() {
        let sink = RecordingActionSink::new();
        sink.throttle_flow("f1", 0.5).await.unwrap();
        sink.notify("ops", "high").await.unwrap();
        assert_eq!(sink.count(), 2);
        assert_eq!(
            sink.actions()[0],
            RecordedAction::Throttle {
                flow_id: "f1".into(),
                rate: 0.5
            }
        );
    }
}
