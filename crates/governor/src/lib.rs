//! 背压治理器
//!
//! 滑动窗口压力采样，按阈值策略在过载前触发限流与扩容。

pub mod analysis;
pub mod governor;
pub mod models;

pub use governor::BackpressureGovernor;
pub use models::{
    ActionKind, Limit, LimitKind, Monitor, MonitorReport, MonitorStats, Pressure, PressureStatus,
    Sample, Threshold, ThresholdAction, Trend,
};
