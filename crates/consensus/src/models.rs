use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conflict::Conflict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Active,
    /// 依赖缺失，不能参与新会话
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub id: String,
    pub process_type: String,
    pub priority: i32,
    pub dependencies: Vec<String>,
}

impl ProcessSpec {
    pub fn new<I: Into<String>, T: Into<String>>(id: I, process_type: T) -> Self {
        Self {
            id: id.into(),
            process_type: process_type.into(),
            priority: 0,
            dependencies: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency<S: Into<String>>(mut self, process_id: S) -> Self {
        self.dependencies.push(process_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub id: String,
    pub process_type: String,
    pub state: ProcessState,
    pub priority: i32,
    pub dependencies: Vec<String>,
    pub last_update: DateTime<Utc>,
}

impl Process {
    pub fn new(spec: ProcessSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: spec.id,
            process_type: spec.process_type,
            state: ProcessState::Active,
            priority: spec.priority,
            dependencies: spec.dependencies,
            last_update: now,
        }
    }
}

/// 会话阶段，除过期和 resolving → consensus 外只能前进
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Initialized,
    Collecting,
    Consensus,
    Resolving,
    Completed,
    Expired,
}

impl SessionPhase {
    pub fn is_final(&self) -> bool {
        matches!(self, SessionPhase::Completed | SessionPhase::Expired)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub topic: String,
    pub value: String,
    /// 参与者ID → 赞成与否
    pub votes: BTreeMap<String, bool>,
    pub created_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(topic: &str, value: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            value: value.to_string(),
            votes: BTreeMap::new(),
            created_at: now,
        }
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    /// 所有投票一致时返回该值
    pub fn unanimous_value(&self) -> Option<bool> {
        let mut values = self.votes.values();
        let first = *values.next()?;
        values.all(|v| *v == first).then_some(first)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub session_type: String,
    pub participants: Vec<String>,
    pub phase: SessionPhase,
    pub deadline: DateTime<Utc>,
    pub decisions: Vec<Decision>,
    pub conflicts: Vec<Conflict>,
    /// 已完成决议占比
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn has_open_conflicts(&self) -> bool {
        self.conflicts.iter().any(|c| c.status.is_open())
    }

    pub fn is_participant(&self, process_id: &str) -> bool {
        self.participants.iter().any(|p| p == process_id)
    }
}

/// 协议条款，每个达成一致的决议对应一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub index: usize,
    pub decision_id: String,
    pub topic: String,
    pub value: String,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub process_id: String,
    pub signed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementState {
    Draft,
    Completed,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agreement {
    pub id: String,
    pub session_id: String,
    pub terms: Vec<Term>,
    pub signatures: Vec<Signature>,
    pub state: AgreementState,
    pub created_at: DateTime<Utc>,
}

/// 治理记录，保存冲突处理失败的完整错误信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub conflict_id: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorMetrics {
    /// 已结束会话中成功完成的比例
    pub success_rate: f64,
    /// 每个会话平均引发的冲突数
    pub conflict_rate: f64,
    pub consensus_failures: u64,
    pub active_sessions: usize,
    pub sessions_created: u64,
    pub sessions_completed: u64,
    pub sessions_expired: u64,
    pub agreements_completed: u64,
    pub agreements_abandoned: u64,
}

/// 一次协调周期的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinateReport {
    pub processes_dropped: Vec<String>,
    pub dependency_errors: Vec<(String, String)>,
    pub sessions_expired: Vec<String>,
    pub consensus_errors: Vec<(String, String)>,
    /// 本周期完成的协议ID
    pub agreements: Vec<String>,
    pub agreements_abandoned: usize,
    pub conflicts_resolved: usize,
    pub conflicts_failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unanimous_value() {
        let mut decision = Decision::new("plan", "v1", Utc::now());
        assert_eq!(decision.unanimous_value(), None);

        decision.votes.insert("a".into(), true);
        decision.votes.insert("b".into(), true);
        assert_eq!(decision.unanimous_value(), Some(true));

        decision.votes.insert("c".into(), false);
        assert_eq!(decision.unanimous_value(), None);
    }

    #[test]
    fn test_phase_order() {
        assert!(SessionPhase::Initialized < SessionPhase::Collecting);
        assert!(SessionPhase::Collecting < SessionPhase::Consensus);
        assert!(SessionPhase::Completed.is_final());
        assert!(!SessionPhase::Resolving.is_final());
    }
}
