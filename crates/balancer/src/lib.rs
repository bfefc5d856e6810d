//! 负载均衡器
//!
//! 为工作负载计算基于评分的理想分布，在健康节点间分配资源，并跟踪节点心跳。

pub mod balancer;
pub mod health;
pub mod models;

pub use balancer::LoadBalancer;
pub use models::{
    Allocation, AllocationStatus, BalanceReport, BalancerMetrics, Node, NodeMetrics, NodeSpec,
    NodeStatus, ResourceVector, Workload, WorkloadSpec,
};
