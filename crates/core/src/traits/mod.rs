use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use controlplane_errors::{ControlPlaneError, ControlPlaneResult};

/// 压力采样来源
///
/// 由调度器（flow）和负载均衡器（resource）实现，治理器按目标拉取当前压力值。
/// 实现方在内部自行加读锁，调用方不得持有自身的锁跨越此调用。
#[async_trait]
pub trait PressureSource: Send + Sync {
    /// 返回 [0, 1] 范围内的流压力
    async fn flow_pressure(&self, flow_id: &str) -> ControlPlaneResult<f64>;

    /// 返回 [0, 1] 范围内的资源压力
    async fn resource_pressure(&self, resource_id: &str) -> ControlPlaneResult<f64>;

    async fn pressure(&self, target: &PressureTarget) -> ControlPlaneResult<f64> {
        match target {
            PressureTarget::Flow(id) => self.flow_pressure(id).await,
            PressureTarget::Resource(id) => self.resource_pressure(id).await,
        }
    }
}

/// 治理动作的执行端
#[async_trait]
pub trait ActionSink: Send + Sync {
    /// 将流的吞吐量乘以 `rate`，`rate` 必须在 [0, 1] 内
    async fn throttle_flow(&self, flow_id: &str, rate: f64) -> ControlPlaneResult<()>;

    /// 将资源负载除以 `factor`，`factor` 必须为正
    async fn scale_resource(&self, resource_id: &str, factor: f64) -> ControlPlaneResult<()>;

    /// 外部告警钩子，默认不做任何事
    async fn notify(&self, _channel: &str, _message: &str) -> ControlPlaneResult<()> {
        Ok(())
    }
}

/// 压力监控目标，文本形式为 `flow:<id>` 或 `resource:<id>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PressureTarget {
    Flow(String),
    Resource(String),
}

impl PressureTarget {
    pub fn id(&self) -> &str {
        match self {
            PressureTarget::Flow(id) | PressureTarget::Resource(id) => id,
        }
    }
}

impl FromStr for PressureTarget {
    type Err = ControlPlaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s.split_once(':').ok_or_else(|| {
            ControlPlaneError::validation(format!("监控目标格式无效: {s}"))
        })?;
        if id.trim().is_empty() {
            return Err(ControlPlaneError::validation(format!(
                "监控目标缺少ID: {s}"
            )));
        }
        match kind {
            "flow" => Ok(PressureTarget::Flow(id.to_string())),
            "resource" => Ok(PressureTarget::Resource(id.to_string())),
            other => Err(ControlPlaneError::validation(format!(
                "未知的监控目标类型: {other}"
            ))),
        }
    }
}

impl TryFrom<String> for PressureTarget {
    type Error = ControlPlaneError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PressureTarget> for String {
    fn from(target: PressureTarget) -> Self {
        target.to_string()
    }
}

impl fmt::Display for PressureTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PressureTarget::Flow(id) => write!(f, "flow:{id}"),
            PressureTarget::Resource(id) => write!(f, "resource:{id}"),
        }
    }
}
