use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use controlplane_core::PressureTarget;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Rising,
    Falling,
    #[default]
    Stable,
}

/// 压力状态，按严重程度递增排序
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PressureStatus {
    #[default]
    Normal,
    Warning,
    High,
    Critical,
}

impl fmt::Display for PressureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PressureStatus::Normal => "normal",
            PressureStatus::Warning => "warning",
            PressureStatus::High => "high",
            PressureStatus::Critical => "critical",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pressure {
    /// [0, 1]
    pub level: f64,
    pub trend: Trend,
    pub status: PressureStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// 窗口内样本的统计量
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorStats {
    pub samples: usize,
    pub average: f64,
    pub peak: f64,
    pub variance: f64,
    /// 最新值减去平均值
    pub trend: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: String,
    pub target: PressureTarget,
    pub active: bool,
    pub samples: VecDeque<Sample>,
    pub stats: MonitorStats,
    pub pressure: Pressure,
    /// 进入非 normal 状态的时间，回到 normal 时清空
    pub non_normal_since: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Monitor {
    pub fn new<S: Into<String>>(id: S, target: PressureTarget) -> Self {
        Self {
            id: id.into(),
            target,
            active: true,
            samples: VecDeque::new(),
            stats: MonitorStats::default(),
            pressure: Pressure::default(),
            non_normal_since: None,
            last_error: None,
            updated_at: None,
        }
    }

    /// 丢弃早于 `cutoff` 的样本
    pub fn prune(&mut self, cutoff: DateTime<Utc>) {
        while self
            .samples
            .front()
            .is_some_and(|sample| sample.timestamp < cutoff)
        {
            self.samples.pop_front();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    /// 压力水平达到 value
    Level,
    /// 非 normal 状态持续达到 duration
    Duration,
    /// 上升趋势且压力水平达到 value
    Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub kind: LimitKind,
    pub value: f64,
    pub duration: Duration,
}

impl Limit {
    pub fn level(value: f64) -> Self {
        Self {
            kind: LimitKind::Level,
            value,
            duration: Duration::ZERO,
        }
    }

    pub fn duration(duration: Duration) -> Self {
        Self {
            kind: LimitKind::Duration,
            value: 0.0,
            duration,
        }
    }

    pub fn trend(value: f64) -> Self {
        Self {
            kind: LimitKind::Trend,
            value,
            duration: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// 吞吐量乘以 rate
    Throttle { rate: f64 },
    /// 负载除以 factor
    Scale { factor: f64 },
    Notify { channel: String },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Throttle { .. } => "throttle",
            ActionKind::Scale { .. } => "scale",
            ActionKind::Notify { .. } => "notify",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdAction {
    pub kind: ActionKind,
    pub cooldown: Duration,
}

impl ThresholdAction {
    pub fn throttle(rate: f64, cooldown: Duration) -> Self {
        Self {
            kind: ActionKind::Throttle { rate },
            cooldown,
        }
    }

    pub fn scale(factor: f64, cooldown: Duration) -> Self {
        Self {
            kind: ActionKind::Scale { factor },
            cooldown,
        }
    }

    pub fn notify<S: Into<String>>(channel: S, cooldown: Duration) -> Self {
        Self {
            kind: ActionKind::Notify {
                channel: channel.into(),
            },
            cooldown,
        }
    }
}

/// 压力阈值策略：任一限制触发时执行全部绑定动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub id: String,
    pub target: PressureTarget,
    pub limits: Vec<Limit>,
    pub actions: Vec<ThresholdAction>,
    /// 数值越大越先评估
    pub priority: i32,
}

impl Threshold {
    pub fn new<S: Into<String>>(id: S, target: PressureTarget) -> Self {
        Self {
            id: id.into(),
            target,
            limits: Vec::new(),
            actions: Vec::new(),
            priority: 0,
        }
    }

    pub fn with_limit(mut self, limit: Limit) -> Self {
        self.limits.push(limit);
        self
    }

    pub fn with_action(mut self, action: ThresholdAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// 一次监控周期的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorReport {
    pub sampled: usize,
    /// 采样失败的监控器及原因
    pub sample_errors: Vec<(String, String)>,
    /// 触发的阈值ID（可能重复，每个匹配的监控器一次）
    pub triggered: Vec<String>,
    pub actions_executed: usize,
    pub actions_failed: usize,
    pub actions_cooling: usize,
}
