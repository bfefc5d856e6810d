//! 日志与指标初始化，以及 `MetricsSink` 的具体实现

pub mod metrics_collector;
pub mod telemetry_setup;

pub use metrics_collector::{FanoutMetricsSink, MetricsCollector, RecordingMetricsSink};
pub use telemetry_setup::{init_metrics, init_structured_logging};
