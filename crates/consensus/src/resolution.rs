use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use controlplane_core::{ControlPlaneError, ControlPlaneResult};

use crate::conflict::{Conflict, ConflictStatus, ConflictType};

/// 条件比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Operator {
    pub fn compare<T: PartialOrd + ?Sized>(&self, left: &T, right: &T) -> bool {
        match self {
            Operator::Eq => left == right,
            Operator::Ne => left != right,
            Operator::Gt => left > right,
            Operator::Ge => left >= right,
            Operator::Lt => left < right,
            Operator::Le => left <= right,
        }
    }
}

/// 解决器视角下的受争用资源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: String,
    pub state: String,
    /// [0, 1]
    pub availability: f64,
}

impl ResourceRecord {
    pub fn new<I: Into<String>, S: Into<String>>(id: I, state: S, availability: f64) -> Self {
        Self {
            id: id.into(),
            state: state.into(),
            availability,
        }
    }
}

/// 策略适用条件
///
/// 资源条件要求冲突涉及的每个资源都满足；参与方和需求条件只要任一满足即可。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    ResourceExists { operator: Operator, value: bool },
    ResourceState { operator: Operator, value: String },
    ResourceAvailability { operator: Operator, value: f64 },
    ConflictStatus { operator: Operator, value: ConflictStatus },
    ConflictPriority { operator: Operator, value: i32 },
    PartyRole { operator: Operator, value: String },
    PartyType { operator: Operator, value: String },
    RequirementFlexibility { operator: Operator, value: f64 },
    RequirementPriority { operator: Operator, value: i32 },
}

impl Condition {
    pub fn evaluate(
        &self,
        conflict: &Conflict,
        resources: &BTreeMap<String, ResourceRecord>,
    ) -> bool {
        let requirements = || conflict.parties.iter().flat_map(|p| p.requirements.iter());
        match self {
            Condition::ResourceExists { operator, value } => {
                !conflict.resources.is_empty()
                    && conflict
                        .resources
                        .iter()
                        .all(|id| operator.compare(&resources.contains_key(id), value))
            }
            Condition::ResourceState { operator, value } => {
                !conflict.resources.is_empty()
                    && conflict.resources.iter().all(|id| {
                        resources
                            .get(id)
                            .is_some_and(|r| operator.compare(r.state.as_str(), value.as_str()))
                    })
            }
            Condition::ResourceAvailability { operator, value } => {
                !conflict.resources.is_empty()
                    && conflict.resources.iter().all(|id| {
                        resources
                            .get(id)
                            .is_some_and(|r| operator.compare(&r.availability, value))
                    })
            }
            Condition::ConflictStatus { operator, value } => operator.compare(&conflict.status, value),
            Condition::ConflictPriority { operator, value } => {
                operator.compare(&conflict.priority, value)
            }
            Condition::PartyRole { operator, value } => conflict
                .parties
                .iter()
                .any(|p| operator.compare(p.role.as_str(), value.as_str())),
            Condition::PartyType { operator, value } => conflict
                .parties
                .iter()
                .any(|p| operator.compare(p.party_type.as_str(), value.as_str())),
            Condition::RequirementFlexibility { operator, value } => {
                requirements().any(|r| operator.compare(&r.flexibility, value))
            }
            Condition::RequirementPriority { operator, value } => {
                requirements().any(|r| operator.compare(&r.priority, value))
            }
        }
    }
}

/// 策略中的一个动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAction {
    pub name: String,
    pub action_type: String,
    pub parameters: BTreeMap<String, String>,
}

impl StrategyAction {
    pub fn new<N: Into<String>, T: Into<String>>(name: N, action_type: T) -> Self {
        Self {
            name: name.into(),
            action_type: action_type.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub name: String,
    pub conditions: Vec<Condition>,
    pub actions: Vec<StrategyAction>,
    pub priority: i32,
    pub runs: u64,
    pub successes: u64,
    pub success_rate: f64,
}

impl Strategy {
    pub fn new<I: Into<String>, N: Into<String>>(id: I, name: N) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            conditions: Vec::new(),
            actions: Vec::new(),
            priority: 0,
            runs: 0,
            successes: 0,
            success_rate: 0.0,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: StrategyAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_applicable(
        &self,
        conflict: &Conflict,
        resources: &BTreeMap<String, ResourceRecord>,
    ) -> bool {
        self.conditions
            .iter()
            .all(|condition| condition.evaluate(conflict, resources))
    }

    pub(crate) fn record_run(&mut self, success: bool) {
        self.runs += 1;
        if success {
            self.successes += 1;
        }
        self.success_rate = self.successes as f64 / self.runs as f64;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    ResourceAllocation,
    ResourceNegotiation,
    StateReconciliation,
    RequirementNegotiation,
    Mediation,
    GeneralResolution,
}

impl ResolutionType {
    /// 按冲突形态确定解决类型
    pub fn for_conflict(conflict: &Conflict) -> Self {
        match conflict.conflict_type {
            ConflictType::Resource if !conflict.resources.is_empty() => {
                ResolutionType::ResourceAllocation
            }
            ConflictType::Resource => ResolutionType::ResourceNegotiation,
            ConflictType::State => ResolutionType::StateReconciliation,
            ConflictType::Requirement
                if conflict.parties.iter().all(|p| !p.requirements.is_empty()) =>
            {
                ResolutionType::RequirementNegotiation
            }
            ConflictType::Requirement => ResolutionType::Mediation,
            ConflictType::Other => ResolutionType::GeneralResolution,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Initiated,
    InProgress,
    Completed,
    Failed,
}

/// 动作执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    /// 动作不适用，未生效但不中断后续步骤
    Skipped,
    Failed,
    /// 前序步骤失败，未执行
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionStep {
    pub index: usize,
    pub action: StrategyAction,
    pub outcome: StepOutcome,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    /// 完成步骤占比
    pub confidence: f64,
    pub impact: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub id: String,
    pub conflict_id: String,
    pub resolution_type: ResolutionType,
    pub strategy_id: Option<String>,
    pub status: ResolutionStatus,
    pub steps: Vec<ResolutionStep>,
    pub result: ResolutionResult,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Resolution {
    pub fn initiated(conflict: &Conflict, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conflict_id: conflict.id.clone(),
            resolution_type: ResolutionType::for_conflict(conflict),
            strategy_id: None,
            status: ResolutionStatus::Initiated,
            steps: Vec::new(),
            result: ResolutionResult::default(),
            error: None,
            created_at: now,
            completed_at: None,
        }
    }

    /// 按已完成步骤计算置信度与影响
    pub(crate) fn finish(&mut self, status: ResolutionStatus, now: DateTime<Utc>) {
        let total = self.steps.len();
        let completed = self
            .steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::Completed)
            .count();
        let confidence = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64
        };
        self.result = ResolutionResult {
            confidence,
            impact: BTreeMap::from([
                ("success_rate".to_string(), confidence),
                ("completion".to_string(), 1.0),
            ]),
        };
        self.status = status;
        self.completed_at = Some(now);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    MaxAttempts,
    LowConfidence,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureReason::Timeout => "timeout",
            FailureReason::MaxAttempts => "max_attempts",
            FailureReason::LowConfidence => "low_confidence",
        };
        f.write_str(name)
    }
}

/// 后台解决失败记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionFailure {
    pub conflict_id: String,
    pub reason: FailureReason,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// 策略动作的执行端
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        conflict: &Conflict,
        action: &StrategyAction,
    ) -> ControlPlaneResult<StepOutcome>;
}

/// 只记录日志的执行器
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingActionExecutor;

#[async_trait]
impl ActionExecutor for LoggingActionExecutor {
    async fn execute(
        &self,
        conflict: &Conflict,
        action: &StrategyAction,
    ) -> ControlPlaneResult<StepOutcome> {
        if action.action_type.trim().is_empty() {
            return Err(ControlPlaneError::validation(format!(
                "动作 {} 缺少类型",
                action.name
            )));
        }
        tracing::info!(
            "冲突 {} 执行动作 {} ({})",
            conflict.id,
            action.name,
            action.action_type
        );
        Ok(StepOutcome::Completed)
    }
}
