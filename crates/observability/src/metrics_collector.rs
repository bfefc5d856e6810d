use std::sync::{Arc, Mutex};

use controlplane_core::{MetricPoint, MetricsSink, RingBuffer};
use metrics::{counter, gauge};

/// 将指标点转发到 `metrics` 门面
///
/// 每个值对应一个 `controlplane_<component>_<name>` 仪表，
/// 同时累加 `controlplane_metric_points_total` 计数器。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn metric_name(component: &str, name: &str) -> String {
        format!("controlplane_{}_{}", sanitize(component), sanitize(name))
    }
}

impl MetricsSink for MetricsCollector {
    fn record(&self, point: &MetricPoint) {
        counter!("controlplane_metric_points_total", "component" => point.component.clone())
            .increment(1);
        for (name, value) in &point.values {
            gauge!(Self::metric_name(&point.component, name)).set(*value);
        }
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// 在内存中保留最近的指标点，供查询和测试使用
#[derive(Debug, Clone)]
pub struct RecordingMetricsSink {
    points: Arc<Mutex<RingBuffer<MetricPoint>>>,
}

impl RecordingMetricsSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: Arc::new(Mutex::new(RingBuffer::with_capacity(capacity))),
        }
    }

    pub fn points(&self) -> Vec<MetricPoint> {
        self.points
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn points_for(&self, component: &str) -> Vec<MetricPoint> {
        self.points
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|p| p.component == component)
            .cloned()
            .collect()
    }

    pub fn latest(&self, component: &str) -> Option<MetricPoint> {
        self.points_for(component).pop()
    }

    pub fn len(&self) -> usize {
        self.points.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RecordingMetricsSink {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl MetricsSink for RecordingMetricsSink {
    fn record(&self, point: &MetricPoint) {
        self.points
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(point.clone());
    }
}

/// 同时写入多个输出端
#[derive(Clone, Default)]
pub struct FanoutMetricsSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl FanoutMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl MetricsSink for FanoutMetricsSink {
    fn record(&self, point: &MetricPoint) {
        for sink in &self.sinks {
            sink.record(point);
        }
    }
}
