use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单个时间点的一组命名指标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub values: BTreeMap<String, f64>,
}

impl MetricPoint {
    pub fn new<S: Into<String>>(component: S, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            component: component.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_value<S: Into<String>>(mut self, name: S, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// 指标输出端，只追加
pub trait MetricsSink: Send + Sync {
    fn record(&self, point: &MetricPoint);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record(&self, _point: &MetricPoint) {}
}
