use serde::{Deserialize, Serialize};

use controlplane_core::{ControlPlaneError, ControlPlaneResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// 资源争用
    Resource,
    /// 状态不一致
    State,
    /// 需求冲突
    Requirement,
    Other,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    #[default]
    Pending,
    Resolving,
    Resolved,
    AutoResolved,
    Failed,
}

impl ConflictStatus {
    /// 仍需处理
    pub fn is_open(&self) -> bool {
        matches!(self, ConflictStatus::Pending | ConflictStatus::Resolving)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    /// [0, 1]，越大越容易让步
    pub flexibility: f64,
    pub priority: i32,
}

impl Requirement {
    pub fn new<S: Into<String>>(name: S, flexibility: f64, priority: i32) -> Self {
        Self {
            name: name.into(),
            flexibility,
            priority,
        }
    }
}

/// 冲突中的一方
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub id: String,
    pub role: String,
    pub party_type: String,
    pub requirements: Vec<Requirement>,
}

impl Party {
    pub fn new<I, R, T>(id: I, role: R, party_type: T) -> Self
    where
        I: Into<String>,
        R: Into<String>,
        T: Into<String>,
    {
        Self {
            id: id.into(),
            role: role.into(),
            party_type: party_type.into(),
            requirements: Vec::new(),
        }
    }

    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub conflict_type: ConflictType,
    pub parties: Vec<Party>,
    /// 涉及的资源ID
    pub resources: Vec<String>,
    pub priority: i32,
    pub status: ConflictStatus,
    /// 来源会话，直接登记到解决器的冲突为空
    pub session_id: Option<String>,
}

impl Conflict {
    pub fn new<S: Into<String>>(id: S, conflict_type: ConflictType) -> Self {
        Self {
            id: id.into(),
            conflict_type,
            parties: Vec::new(),
            resources: Vec::new(),
            priority: 0,
            status: ConflictStatus::Pending,
            session_id: None,
        }
    }

    pub fn with_party(mut self, party: Party) -> Self {
        self.parties.push(party);
        self
    }

    pub fn with_resource<S: Into<String>>(mut self, resource_id: S) -> Self {
        self.resources.push(resource_id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn validate(&self) -> ControlPlaneResult<()> {
        if self.id.trim().is_empty() {
            return Err(ControlPlaneError::validation("冲突ID不能为空"));
        }
        if self.parties.is_empty() {
            return Err(ControlPlaneError::validation(format!(
                "冲突 {} 至少需要一个参与方",
                self.id
            )));
        }
        Ok(())
    }
}
