use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 组件历史记录条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    /// 事件主体，例如任务ID或节点ID
    pub subject: String,
    pub event: String,
    pub detail: Option<String>,
}

impl HistoryEntry {
    pub fn new<S: Into<String>, E: Into<String>>(
        timestamp: DateTime<Utc>,
        subject: S,
        event: E,
    ) -> Self {
        Self {
            timestamp,
            subject: subject.into(),
            event: event.into(),
            detail: None,
        }
    }

    pub fn with_detail<D: Into<String>>(mut self, detail: D) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
