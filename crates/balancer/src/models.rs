use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use controlplane_core::PressureTarget;

const EPSILON: f64 = 1e-9;

/// 四个维度的资源量
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceVector {
    pub cpu: f64,
    pub memory: f64,
    pub storage: f64,
    pub network: f64,
}

impl ResourceVector {
    pub fn new(cpu: f64, memory: f64, storage: f64, network: f64) -> Self {
        Self {
            cpu,
            memory,
            storage,
            network,
        }
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self {
            cpu: self.cpu * factor,
            memory: self.memory * factor,
            storage: self.storage * factor,
            network: self.network * factor,
        }
    }

    pub fn add(&self, other: &Self) -> Self {
        Self {
            cpu: self.cpu + other.cpu,
            memory: self.memory + other.memory,
            storage: self.storage + other.storage,
            network: self.network + other.network,
        }
    }

    /// 逐维相减，结果不小于 0
    pub fn saturating_sub(&self, other: &Self) -> Self {
        Self {
            cpu: (self.cpu - other.cpu).max(0.0),
            memory: (self.memory - other.memory).max(0.0),
            storage: (self.storage - other.storage).max(0.0),
            network: (self.network - other.network).max(0.0),
        }
    }

    /// 每个维度都不超过 `limit`
    pub fn fits_within(&self, limit: &Self) -> bool {
        self.cpu <= limit.cpu + EPSILON
            && self.memory <= limit.memory + EPSILON
            && self.storage <= limit.storage + EPSILON
            && self.network <= limit.network + EPSILON
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub capacity: ResourceVector,
    /// 均衡周期内从压力源读取负载，代替等待心跳
    #[serde(default)]
    pub load_source: Option<PressureTarget>,
}

impl NodeSpec {
    pub fn new<S: Into<String>>(id: S, capacity: ResourceVector) -> Self {
        Self {
            id: id.into(),
            capacity,
            load_source: None,
        }
    }

    pub fn with_load_source(mut self, target: PressureTarget) -> Self {
        self.load_source = Some(target);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Healthy,
    Busy,
    Overloaded,
    Offline,
}

impl NodeStatus {
    /// 可以承接新分配，只有 healthy 节点参与容量校验和评分
    pub fn is_available(&self) -> bool {
        matches!(self, NodeStatus::Healthy)
    }
}

/// 由负载推导出的节点运行指标
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub utilization: f64,
    pub response_time_ms: f64,
    pub throughput: f64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub capacity: ResourceVector,
    pub health: f64,
    pub status: NodeStatus,
    /// 当前负载，[0, 1]
    pub load: f64,
    pub last_heartbeat: DateTime<Utc>,
    pub metrics: NodeMetrics,
    pub load_source: Option<PressureTarget>,
}

impl Node {
    pub fn new(spec: NodeSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: spec.id,
            capacity: spec.capacity,
            health: 1.0,
            status: NodeStatus::Healthy,
            load: 0.0,
            last_heartbeat: now,
            metrics: NodeMetrics::default(),
            load_source: spec.load_source,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub id: String,
    /// 最低资源需求
    pub requirement: ResourceVector,
    /// 数值越大越重要
    pub priority: i32,
}

impl WorkloadSpec {
    pub fn new<S: Into<String>>(id: S, requirement: ResourceVector, priority: i32) -> Self {
        Self {
            id: id.into(),
            requirement,
            priority,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    pub id: String,
    pub requirement: ResourceVector,
    pub priority: i32,
    /// 最近一次分析得到的理想分布（节点ID → 比例）
    pub ideal_distribution: BTreeMap<String, f64>,
    /// 平滑后的实际分布（节点ID → 比例）
    pub distribution: BTreeMap<String, f64>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Workload {
    pub fn new(spec: WorkloadSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: spec.id,
            requirement: spec.requirement,
            priority: spec.priority,
            ideal_distribution: BTreeMap::new(),
            distribution: BTreeMap::new(),
            last_error: None,
            updated_at: now,
        }
    }

    pub fn distribution_total(&self) -> f64 {
        self.distribution.values().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Pending,
    Active,
    Failed,
    Completed,
}

impl AllocationStatus {
    /// 仍占用节点容量
    pub fn is_live(&self) -> bool {
        matches!(self, AllocationStatus::Pending | AllocationStatus::Active)
    }
}

/// 工作负载在某个节点上的资源授予
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub id: Uuid,
    pub workload_id: String,
    pub node_id: String,
    pub resources: ResourceVector,
    pub percentage: f64,
    pub status: AllocationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Allocation {
    pub fn pending(
        workload_id: &str,
        node_id: &str,
        resources: ResourceVector,
        percentage: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workload_id: workload_id.to_string(),
            node_id: node_id.to_string(),
            resources,
            percentage,
            status: AllocationStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalancerMetrics {
    pub load_variance: f64,
    pub imbalance: f64,
    pub active_allocations: usize,
    pub nodes_total: usize,
    pub healthy: usize,
    pub busy: usize,
    pub overloaded: usize,
    pub offline: usize,
}

/// 一次均衡周期的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceReport {
    pub nodes_offline: Vec<String>,
    /// 本周期从压力源刷新了负载的节点
    pub nodes_fed: Vec<String>,
    pub activated: usize,
    pub failed: usize,
    pub skipped: usize,
    /// 分析或规划失败的工作负载及原因
    pub workload_errors: Vec<(String, String)>,
    pub load_variance: f64,
    pub imbalance: f64,
}
