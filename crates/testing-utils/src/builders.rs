//! 测试数据构建器
//!
//! 以合理的默认值创建各组件的输入数据，按需覆盖个别字段。

use chrono::{DateTime, Utc};
use controlplane_balancer::{NodeSpec, ResourceVector, WorkloadSpec};
use controlplane_consensus::{Conflict, ConflictType, Party, Requirement};
use controlplane_core::PressureTarget;
use controlplane_scheduler::Task;

/// 构建调度任务
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            task: Task::new(id, 0),
        }
    }

    pub fn with_priority(mut self, priority: usize) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_dependency(mut self, task_id: &str) -> Self {
        self.task.dependencies.push(task_id.to_string());
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.task.deadline = Some(deadline);
        self
    }

    pub fn with_flow(mut self, flow_id: &str) -> Self {
        self.task.flow_id = Some(flow_id.to_string());
        self
    }

    pub fn created_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.task.created_at = timestamp;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// 构建节点，默认容量为四个维度各 100
pub struct NodeBuilder {
    spec: NodeSpec,
}

impl NodeBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            spec: NodeSpec::new(id, ResourceVector::new(100.0, 100.0, 100.0, 100.0)),
        }
    }

    pub fn with_capacity(mut self, cpu: f64, memory: f64, storage: f64, network: f64) -> Self {
        self.spec.capacity = ResourceVector::new(cpu, memory, storage, network);
        self
    }

    /// `target` 使用 `flow:<id>` 或 `resource:<id>` 形式
    pub fn with_load_source(mut self, target: &str) -> Self {
        self.spec.load_source = Some(target.parse::<PressureTarget>().unwrap());
        self
    }

    pub fn build(self) -> NodeSpec {
        self.spec
    }
}

/// 构建工作负载，默认需求为 cpu/memory 各 10
pub struct WorkloadBuilder {
    spec: WorkloadSpec,
}

impl WorkloadBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            spec: WorkloadSpec::new(id, ResourceVector::new(10.0, 10.0, 0.0, 0.0), 0),
        }
    }

    pub fn with_requirement(mut self, cpu: f64, memory: f64, storage: f64, network: f64) -> Self {
        self.spec.requirement = ResourceVector::new(cpu, memory, storage, network);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.spec.priority = priority;
        self
    }

    pub fn build(self) -> WorkloadSpec {
        self.spec
    }
}

/// 构建冲突，默认包含一个参与方
pub struct ConflictBuilder {
    conflict: Conflict,
}

impl ConflictBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            conflict: Conflict::new(id, ConflictType::Resource)
                .with_party(Party::new("party-1", "owner", "service")),
        }
    }

    pub fn with_type(mut self, conflict_type: ConflictType) -> Self {
        self.conflict.conflict_type = conflict_type;
        self
    }

    pub fn with_party(mut self, id: &str, role: &str, party_type: &str) -> Self {
        self.conflict
            .parties
            .push(Party::new(id, role, party_type));
        self
    }

    /// 为最后一个参与方追加需求
    pub fn with_requirement(mut self, name: &str, flexibility: f64, priority: i32) -> Self {
        if let Some(party) = self.conflict.parties.last_mut() {
            party
                .requirements
                .push(Requirement::new(name, flexibility, priority));
        }
        self
    }

    pub fn with_resource(mut self, resource_id: &str) -> Self {
        self.conflict.resources.push(resource_id.to_string());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.conflict.priority = priority;
        self
    }

    pub fn without_parties(mut self) -> Self {
        self.conflict.parties.clear();
        self
    }

    pub fn build(self) -> Conflict {
        self.conflict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_defaults() {
        let task = TaskBuilder::new("t1").with_priority(2).with_flow("f1").build();
        assert_eq!(task.priority, 2);
        assert_eq!(task.flow_id.as_deref(), Some("f1"));

        let node = NodeBuilder::new("n1").build();
        assert_eq!(node.capacity.cpu, 100.0);

        let conflict = ConflictBuilder::new("c1")
            .with_requirement("cpu", 0.5, 1)
            .build();
        assert_eq!(conflict.parties.len(), 1);
        assert_eq!(conflict.parties[0].requirements.len(), 1);
        assert!(conflict.validate().is_ok());
    }
}
