use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use controlplane_config::BalancerConfig;
use controlplane_core::{
    to_chrono, Clock, ControlPlaneError, ControlPlaneResult, HistoryEntry, MetricPoint,
    MetricsSink, NoopMetricsSink, PressureSource, PressureTarget, RingBuffer, SystemClock,
};

use crate::health::{
    classify, derive_metrics, ideal_distribution, imbalance, load_variance, score,
    smooth_distribution,
};
use crate::models::{
    Allocation, AllocationStatus, BalanceReport, BalancerMetrics, Node, NodeSpec, NodeStatus,
    ResourceVector, Workload, WorkloadSpec,
};

pub const COMPONENT: &str = "balancer";

struct BalancerState {
    nodes: BTreeMap<String, Node>,
    workloads: BTreeMap<String, Workload>,
    /// 仍占用容量的分配（pending / active）
    allocations: Vec<Allocation>,
    /// 已结束的分配
    allocation_log: RingBuffer<Allocation>,
    history: RingBuffer<HistoryEntry>,
    metric_points: RingBuffer<MetricPoint>,
}

/// 单个工作负载的规划结果
struct WorkloadPlan {
    workload_id: String,
    ideal: BTreeMap<String, f64>,
    allocations: Vec<Allocation>,
}

impl BalancerState {
    fn new(config: &BalancerConfig) -> Self {
        Self {
            nodes: BTreeMap::new(),
            workloads: BTreeMap::new(),
            allocations: Vec::new(),
            allocation_log: RingBuffer::with_capacity(config.history_size),
            history: RingBuffer::with_capacity(config.history_size),
            metric_points: RingBuffer::with_capacity(config.history_size),
        }
    }

    fn record(&mut self, now: DateTime<Utc>, subject: &str, event: &str, detail: Option<String>) {
        let mut entry = HistoryEntry::new(now, subject, event);
        entry.detail = detail;
        self.history.push(entry);
    }

    /// 将满足条件的存活分配转为终态并移入日志
    fn retire<F>(&mut self, status: AllocationStatus, now: DateTime<Utc>, predicate: F) -> usize
    where
        F: Fn(&Allocation) -> bool,
    {
        let (retired, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.allocations)
            .into_iter()
            .partition(|allocation| predicate(allocation));
        self.allocations = live;

        let count = retired.len();
        for mut allocation in retired {
            allocation.status = status;
            allocation.updated_at = now;
            self.allocation_log.push(allocation);
        }
        count
    }

    /// 节点上其他工作负载占用的资源
    fn used_by_others(&self, node_id: &str, workload_id: &str) -> ResourceVector {
        self.allocations
            .iter()
            .filter(|a| a.node_id == node_id && a.workload_id != workload_id)
            .fold(ResourceVector::default(), |acc, a| acc.add(&a.resources))
    }

    fn live_loads(&self) -> Vec<f64> {
        self.nodes
            .values()
            .filter(|node| node.status != NodeStatus::Offline)
            .map(|node| node.load)
            .collect()
    }

    fn metrics(&self) -> BalancerMetrics {
        let loads = self.live_loads();
        let mut metrics = BalancerMetrics {
            load_variance: load_variance(&loads),
            imbalance: imbalance(&loads),
            active_allocations: self
                .allocations
                .iter()
                .filter(|a| a.status == AllocationStatus::Active)
                .count(),
            nodes_total: self.nodes.len(),
            ..Default::default()
        };
        for node in self.nodes.values() {
            match node.status {
                NodeStatus::Healthy => metrics.healthy += 1,
                NodeStatus::Busy => metrics.busy += 1,
                NodeStatus::Overloaded => metrics.overloaded += 1,
                NodeStatus::Offline => metrics.offline += 1,
            }
        }
        metrics
    }
}

/// 负载均衡器
///
/// 周期性地为每个工作负载计算理想分布并在节点间重新分配资源。
/// 绑定了压力源的节点在每个周期开始时只读查询一次负载。
#[derive(Clone)]
pub struct LoadBalancer {
    config: Arc<BalancerConfig>,
    state: Arc<RwLock<BalancerState>>,
    clock: Arc<dyn Clock>,
    metrics_sink: Arc<dyn MetricsSink>,
    load_feed: Option<Arc<dyn PressureSource>>,
}

impl LoadBalancer {
    pub fn new(config: BalancerConfig, clock: Arc<dyn Clock>) -> Self {
        let state = BalancerState::new(&config);
        Self {
            config: Arc::new(config),
            state: Arc::new(RwLock::new(state)),
            clock,
            metrics_sink: Arc::new(NoopMetricsSink),
            load_feed: None,
        }
    }

    pub fn with_system_clock(config: BalancerConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = sink;
        self
    }

    pub fn with_load_feed(mut self, feed: Arc<dyn PressureSource>) -> Self {
        self.load_feed = Some(feed);
        self
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    pub async fn register_node(&self, spec: NodeSpec) -> ControlPlaneResult<()> {
        if spec.id.trim().is_empty() {
            return Err(ControlPlaneError::validation("节点ID不能为空"));
        }
        let capacity = &spec.capacity;
        if !(capacity.cpu > 0.0 && capacity.memory > 0.0) {
            return Err(ControlPlaneError::validation(format!(
                "节点 {} 的CPU和内存容量必须大于0",
                spec.id
            )));
        }
        if capacity.storage < 0.0 || capacity.network < 0.0 {
            return Err(ControlPlaneError::validation(format!(
                "节点 {} 的存储和网络容量不能为负",
                spec.id
            )));
        }

        let now = self.clock.now();
        let mut state = self.state.write().await;
        if state.nodes.contains_key(&spec.id) {
            return Err(ControlPlaneError::validation(format!(
                "节点 {} 已存在",
                spec.id
            )));
        }
        let id = spec.id.clone();
        let mut node = Node::new(spec, now);
        node.metrics = derive_metrics(
            0.0,
            &node.capacity,
            self.config.base_response_time_ms,
            self.config.max_load,
        );
        state.nodes.insert(id.clone(), node);
        state.record(now, &id, "node_registered", None);

        info!("注册节点: {}", id);
        Ok(())
    }

    pub async fn deregister_node(&self, node_id: &str) -> ControlPlaneResult<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        if state.nodes.remove(node_id).is_none() {
            return Err(ControlPlaneError::not_found("节点", node_id));
        }
        let failed = state.retire(AllocationStatus::Failed, now, |a| a.node_id == node_id);
        state.record(
            now,
            node_id,
            "node_deregistered",
            Some(format!("failed_allocations={failed}")),
        );

        info!("注销节点: {} (失效分配 {})", node_id, failed);
        Ok(())
    }

    /// 记录心跳与当前负载，负载截断到 [0, 1]
    pub async fn heartbeat(&self, node_id: &str, load: f64) -> ControlPlaneResult<()> {
        if !load.is_finite() {
            return Err(ControlPlaneError::validation(format!(
                "节点 {node_id} 上报的负载无效: {load}"
            )));
        }
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let node = state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| ControlPlaneError::not_found("节点", node_id))?;

        let was_offline = node.status == NodeStatus::Offline;
        node.last_heartbeat = now;
        self.apply_load(node, load);

        if was_offline {
            info!("节点 {} 恢复在线", node_id);
            state.record(now, node_id, "node_online", None);
        }
        debug!("节点 {} 心跳，负载 {:.2}", node_id, load);
        Ok(())
    }

    fn apply_load(&self, node: &mut Node, load: f64) {
        node.load = load.clamp(0.0, 1.0);
        let (status, health) = classify(node.load, self.config.target_load, self.config.max_load);
        node.status = status;
        node.health = health;
        node.metrics = derive_metrics(
            node.load,
            &node.capacity,
            self.config.base_response_time_ms,
            self.config.max_load,
        );
    }

    pub async fn register_workload(&self, spec: WorkloadSpec) -> ControlPlaneResult<()> {
        if spec.id.trim().is_empty() {
            return Err(ControlPlaneError::validation("工作负载ID不能为空"));
        }

        let now = self.clock.now();
        let mut state = self.state.write().await;
        if state.workloads.contains_key(&spec.id) {
            return Err(ControlPlaneError::validation(format!(
                "工作负载 {} 已存在",
                spec.id
            )));
        }
        let id = spec.id.clone();
        let priority = spec.priority;
        state.workloads.insert(id.clone(), Workload::new(spec, now));
        state.record(now, &id, "workload_registered", Some(format!("priority={priority}")));

        info!("注册工作负载: {} (优先级 {})", id, priority);
        Ok(())
    }

    pub async fn remove_workload(&self, workload_id: &str) -> ControlPlaneResult<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        if state.workloads.remove(workload_id).is_none() {
            return Err(ControlPlaneError::not_found("工作负载", workload_id));
        }
        let released = state.retire(AllocationStatus::Completed, now, |a| {
            a.workload_id == workload_id
        });
        state.record(
            now,
            workload_id,
            "workload_removed",
            Some(format!("released_allocations={released}")),
        );
        Ok(())
    }

    /// 运行一个均衡周期
    pub async fn balance(&self) -> ControlPlaneResult<BalanceReport> {
        let mut report = BalanceReport::default();

        self.refresh_fed_loads(&mut report).await;
        self.update_node_statuses(&mut report).await;

        let (plans, errors) = {
            let state = self.state.read().await;
            self.plan(&state, &mut report)
        };

        let now = self.clock.now();
        let mut state = self.state.write().await;

        for (workload_id, error) in errors {
            warn!("工作负载 {} 本周期未能均衡: {}", workload_id, error);
            if let Some(workload) = state.workloads.get_mut(&workload_id) {
                workload.last_error = Some(error.to_string());
            }
            state.record(now, &workload_id, "workload_error", Some(error.to_string()));
            report.workload_errors.push((workload_id, error.to_string()));
        }

        for plan in plans {
            self.apply_plan(&mut state, plan, now, &mut report);
        }

        let metrics = state.metrics();
        report.load_variance = metrics.load_variance;
        report.imbalance = metrics.imbalance;

        let point = MetricPoint::new(COMPONENT, now)
            .with_value("load_variance", metrics.load_variance)
            .with_value("imbalance", metrics.imbalance)
            .with_value("active_allocations", metrics.active_allocations as f64)
            .with_value("nodes_healthy", metrics.healthy as f64)
            .with_value("nodes_busy", metrics.busy as f64)
            .with_value("nodes_overloaded", metrics.overloaded as f64)
            .with_value("nodes_offline", metrics.offline as f64);
        state.metric_points.push(point.clone());
        drop(state);

        self.metrics_sink.record(&point);

        info!(
            "均衡周期完成: 激活 {}，失败 {}，跳过 {}，方差 {:.4}，不均衡度 {:.4}",
            report.activated, report.failed, report.skipped, report.load_variance, report.imbalance
        );
        Ok(report)
    }

    /// 从压力源读取绑定节点的负载，查询期间不持有状态锁
    ///
    /// 读取成功等同于一次心跳；失败的节点保持原样，由心跳超时规则处理。
    async fn refresh_fed_loads(&self, report: &mut BalanceReport) {
        let Some(feed) = &self.load_feed else {
            return;
        };

        let bound: Vec<(String, PressureTarget)> = {
            let state = self.state.read().await;
            state
                .nodes
                .values()
                .filter_map(|node| {
                    node.load_source
                        .clone()
                        .map(|target| (node.id.clone(), target))
                })
                .collect()
        };
        if bound.is_empty() {
            return;
        }

        let mut readings = Vec::with_capacity(bound.len());
        for (node_id, target) in bound {
            let reading = feed.pressure(&target).await;
            readings.push((node_id, target, reading));
        }

        let now = self.clock.now();
        let mut state = self.state.write().await;
        for (node_id, target, reading) in readings {
            match reading {
                Ok(load) if load.is_finite() => {
                    let Some(node) = state.nodes.get_mut(&node_id) else {
                        continue;
                    };
                    let was_offline = node.status == NodeStatus::Offline;
                    node.last_heartbeat = now;
                    self.apply_load(node, load);
                    if was_offline {
                        info!("节点 {} 经压力源恢复在线", node_id);
                        state.record(now, &node_id, "node_online", None);
                    }
                    debug!("节点 {} 从 {} 读取负载 {:.2}", node_id, target, load);
                    report.nodes_fed.push(node_id);
                }
                Ok(load) => {
                    warn!("节点 {} 的压力源 {} 返回无效负载: {}", node_id, target, load);
                    state.record(
                        now,
                        &node_id,
                        "load_feed_failed",
                        Some(format!("invalid load {load}")),
                    );
                }
                Err(e) => {
                    warn!("读取节点 {} 的压力源 {} 失败: {}", node_id, target, e);
                    state.record(now, &node_id, "load_feed_failed", Some(e.to_string()));
                }
            }
        }
    }

    /// 阶段一：心跳超时的节点置为 offline，其余节点按负载重新分级
    async fn update_node_statuses(&self, report: &mut BalanceReport) {
        let now = self.clock.now();
        let offline_after = to_chrono(self.config.offline_after());
        let mut state = self.state.write().await;

        let mut went_offline = Vec::new();
        for node in state.nodes.values_mut() {
            if now - node.last_heartbeat > offline_after {
                if node.status != NodeStatus::Offline {
                    node.status = NodeStatus::Offline;
                    node.health = 0.0;
                    went_offline.push(node.id.clone());
                }
                continue;
            }
            let load = node.load;
            self.apply_load(node, load);
        }

        for node_id in went_offline {
            let failed = state.retire(AllocationStatus::Failed, now, |a| a.node_id == node_id);
            warn!("节点 {} 心跳超时，标记为离线 (失效分配 {})", node_id, failed);
            state.record(
                now,
                &node_id,
                "node_offline",
                Some(format!("failed_allocations={failed}")),
            );
            report.nodes_offline.push(node_id);
        }
    }

    /// 阶段二、三：分析工作负载并按优先级规划分配
    fn plan(
        &self,
        state: &BalancerState,
        report: &mut BalanceReport,
    ) -> (Vec<WorkloadPlan>, Vec<(String, ControlPlaneError)>) {
        let mut workloads: Vec<&Workload> = state.workloads.values().collect();
        workloads.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

        let mut plans: Vec<WorkloadPlan> = Vec::new();
        let mut errors = Vec::new();

        for workload in workloads {
            let ranked = match self.analyze(state, workload) {
                Ok(ranked) => ranked,
                Err(e) => {
                    errors.push((workload.id.clone(), e));
                    continue;
                }
            };
            let ideal = ideal_distribution(&ranked);
            let now = self.clock.now();

            let mut allocations = Vec::new();
            for (node_id, _) in &ranked {
                let Some(percentage) = ideal.get(node_id).copied() else {
                    continue;
                };
                let Some(node) = state.nodes.get(node_id) else {
                    continue;
                };
                let resources = workload.requirement.scale(percentage);
                let used = Self::planned_usage(state, &plans, node_id, &workload.id);
                let remaining = node.capacity.saturating_sub(&used);

                if resources.fits_within(&remaining) {
                    allocations.push(Allocation::pending(
                        &workload.id,
                        node_id,
                        resources,
                        percentage,
                        now,
                    ));
                } else {
                    debug!(
                        "工作负载 {} 在节点 {} 上的分配超出剩余容量，跳过",
                        workload.id, node_id
                    );
                    report.skipped += 1;
                }
            }

            plans.push(WorkloadPlan {
                workload_id: workload.id.clone(),
                ideal,
                allocations,
            });
        }

        (plans, errors)
    }

    /// 校验需求并为可用节点打分，按分数降序返回
    fn analyze(
        &self,
        state: &BalancerState,
        workload: &Workload,
    ) -> ControlPlaneResult<Vec<(String, f64)>> {
        let requirement = &workload.requirement;
        if !(requirement.cpu > 0.0 && requirement.memory > 0.0) {
            return Err(ControlPlaneError::validation(format!(
                "工作负载 {} 的最低CPU和内存需求必须大于0",
                workload.id
            )));
        }
        if requirement.storage < 0.0 || requirement.network < 0.0 {
            return Err(ControlPlaneError::validation(format!(
                "工作负载 {} 的存储和网络需求不能为负",
                workload.id
            )));
        }

        let available: Vec<&Node> = state
            .nodes
            .values()
            .filter(|node| node.status.is_available())
            .collect();
        if available.is_empty() {
            return Err(ControlPlaneError::resource("没有可用节点"));
        }

        let aggregate = available
            .iter()
            .fold(ResourceVector::default(), |acc, node| acc.add(&node.capacity));
        if !requirement.fits_within(&aggregate) {
            return Err(ControlPlaneError::resource(format!(
                "可用节点总容量不足以满足工作负载 {}",
                workload.id
            )));
        }

        let mut ranked: Vec<(String, f64)> = available
            .iter()
            .map(|node| {
                (
                    node.id.clone(),
                    score(node.health, node.load, &node.capacity, requirement),
                )
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(ranked)
    }

    /// 规划期间节点上已被其他工作负载占用的资源
    ///
    /// 已在本周期规划过的工作负载按新规划计算，其余按现有分配计算。
    fn planned_usage(
        state: &BalancerState,
        plans: &[WorkloadPlan],
        node_id: &str,
        workload_id: &str,
    ) -> ResourceVector {
        let existing = state
            .allocations
            .iter()
            .filter(|a| a.node_id == node_id && a.workload_id != workload_id)
            .filter(|a| !plans.iter().any(|p| p.workload_id == a.workload_id))
            .fold(ResourceVector::default(), |acc, a| acc.add(&a.resources));

        plans
            .iter()
            .filter(|p| p.workload_id != workload_id)
            .flat_map(|p| p.allocations.iter())
            .filter(|a| a.node_id == node_id)
            .fold(existing, |acc, a| acc.add(&a.resources))
    }

    /// 阶段四：按当前容量复核并生效，平滑更新分布
    fn apply_plan(
        &self,
        state: &mut BalancerState,
        plan: WorkloadPlan,
        now: DateTime<Utc>,
        report: &mut BalanceReport,
    ) {
        if !state.workloads.contains_key(&plan.workload_id) {
            return;
        }
        let workload_id = plan.workload_id.clone();

        state.retire(AllocationStatus::Completed, now, |a| a.workload_id == workload_id);

        let mut current = BTreeMap::new();
        let mut failed_nodes = Vec::new();
        for mut allocation in plan.allocations {
            let valid = match state.nodes.get(&allocation.node_id) {
                Some(node) if node.status != NodeStatus::Offline => {
                    let used = state.used_by_others(&allocation.node_id, &workload_id);
                    allocation
                        .resources
                        .fits_within(&node.capacity.saturating_sub(&used))
                }
                _ => false,
            };
            allocation.updated_at = now;
            if valid {
                allocation.status = AllocationStatus::Active;
                current.insert(allocation.node_id.clone(), allocation.percentage);
                state.allocations.push(allocation);
                report.activated += 1;
            } else {
                allocation.status = AllocationStatus::Failed;
                failed_nodes.push(allocation.node_id.clone());
                state.allocation_log.push(allocation);
                report.failed += 1;
            }
        }

        let alpha = self.config.smoothing_factor;
        if let Some(workload) = state.workloads.get_mut(&workload_id) {
            workload.distribution = smooth_distribution(&workload.distribution, &current, alpha);
            workload.ideal_distribution = plan.ideal;
            workload.last_error = None;
            workload.updated_at = now;
        }

        let mut grouped: HashMap<&str, usize> = HashMap::new();
        for node_id in &failed_nodes {
            *grouped.entry(node_id.as_str()).or_default() += 1;
        }
        for (node_id, count) in grouped {
            warn!(
                "工作负载 {} 在节点 {} 上的 {} 个分配复核失败",
                workload_id, node_id, count
            );
        }
        state.record(
            now,
            &workload_id,
            "rebalanced",
            Some(format!(
                "active={} failed={}",
                current.len(),
                failed_nodes.len()
            )),
        );
    }

    /// 资源压力即节点当前负载
    pub async fn resource_pressure(&self, node_id: &str) -> ControlPlaneResult<f64> {
        let state = self.state.read().await;
        state
            .nodes
            .get(node_id)
            .map(|node| node.load)
            .ok_or_else(|| ControlPlaneError::not_found("节点", node_id))
    }

    /// 负载除以 `factor`，结果不超过 max_load
    pub async fn scale_resource(&self, node_id: &str, factor: f64) -> ControlPlaneResult<()> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(ControlPlaneError::validation(format!(
                "扩缩容系数必须为正: {factor}"
            )));
        }
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let node = state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| ControlPlaneError::not_found("节点", node_id))?;

        let before = node.load;
        let scaled = (node.load / factor).min(self.config.max_load);
        self.apply_load(node, scaled);
        let after = node.load;
        state.record(
            now,
            node_id,
            "resource_scaled",
            Some(format!("factor={factor} load={before:.3}->{after:.3}")),
        );

        info!("节点 {} 负载调整 {:.3} -> {:.3}", node_id, before, after);
        Ok(())
    }

    pub async fn node(&self, node_id: &str) -> Option<Node> {
        self.state.read().await.nodes.get(node_id).cloned()
    }

    pub async fn workload(&self, workload_id: &str) -> Option<Workload> {
        self.state.read().await.workloads.get(workload_id).cloned()
    }

    /// 工作负载当前占用容量的分配
    pub async fn allocations_for(&self, workload_id: &str) -> Vec<Allocation> {
        self.state
            .read()
            .await
            .allocations
            .iter()
            .filter(|a| a.workload_id == workload_id)
            .cloned()
            .collect()
    }

    /// 最近结束的分配
    pub async fn allocation_log(&self) -> Vec<Allocation> {
        self.state.read().await.allocation_log.to_vec()
    }

    pub async fn metrics(&self) -> BalancerMetrics {
        self.state.read().await.metrics()
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.state.read().await.history.to_vec()
    }

    pub async fn metric_points(&self) -> Vec<MetricPoint> {
        self.state.read().await.metric_points.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use controlplane_core::{ErrorKind, ManualClock};
    use std::time::Duration;

    fn capacity() -> ResourceVector {
        ResourceVector::new(4.0, 8.0, 100.0, 10.0)
    }

    fn balancer() -> (LoadBalancer, ManualClock) {
        let clock = ManualClock::default();
        (
            LoadBalancer::new(BalancerConfig::default(), Arc::new(clock.clone())),
            clock,
        )
    }

    #[tokio::test]
    async fn test_register_node_validation() {
        let (balancer, _) = balancer();
        let err = balancer
            .register_node(NodeSpec::new("", capacity()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = balancer
            .register_node(NodeSpec::new("n1", ResourceVector::new(0.0, 8.0, 0.0, 0.0)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        balancer
            .register_node(NodeSpec::new("n1", capacity()))
            .await
            .unwrap();
        let err = balancer
            .register_node(NodeSpec::new("n1", capacity()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_balance_spreads_workload() {
        let (balancer, _) = balancer();
        for id in ["n1", "n2", "n3"] {
            balancer
                .register_node(NodeSpec::new(id, capacity()))
                .await
                .unwrap();
        }
        balancer
            .register_workload(WorkloadSpec::new(
                "w1",
                ResourceVector::new(1.2, 1.0, 0.0, 0.0),
                1,
            ))
            .await
            .unwrap();

        let report = balancer.balance().await.unwrap();
        assert_eq!(report.activated, 3);
        assert!(report.workload_errors.is_empty());

        let allocations = balancer.allocations_for("w1").await;
        assert_eq!(allocations.len(), 3);
        let total: f64 = allocations.iter().map(|a| a.percentage).sum();
        assert!((total - 1.0).abs() < 1e-9);

        let workload = balancer.workload("w1").await.unwrap();
        assert!((workload.distribution_total() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rebalance_completes_previous_allocations() {
        let (balancer, _) = balancer();
        balancer
            .register_node(NodeSpec::new("n1", capacity()))
            .await
            .unwrap();
        balancer
            .register_workload(WorkloadSpec::new(
                "w1",
                ResourceVector::new(1.0, 1.0, 0.0, 0.0),
                1,
            ))
            .await
            .unwrap();

        balancer.balance().await.unwrap();
        balancer.balance().await.unwrap();

        assert_eq!(balancer.allocations_for("w1").await.len(), 1);
        let log = balancer.allocation_log().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, AllocationStatus::Completed);
    }

    #[tokio::test]
    async fn test_workload_errors_do_not_abort_cycle() {
        let (balancer, _) = balancer();
        balancer
            .register_node(NodeSpec::new("n1", capacity()))
            .await
            .unwrap();
        balancer
            .register_workload(WorkloadSpec::new(
                "bad",
                ResourceVector::new(0.0, 1.0, 0.0, 0.0),
                5,
            ))
            .await
            .unwrap();
        balancer
            .register_workload(WorkloadSpec::new(
                "huge",
                ResourceVector::new(100.0, 1.0, 0.0, 0.0),
                4,
            ))
            .await
            .unwrap();
        balancer
            .register_workload(WorkloadSpec::new(
                "ok",
                ResourceVector::new(1.0, 1.0, 0.0, 0.0),
                1,
            ))
            .await
            .unwrap();

        let report = balancer.balance().await.unwrap();
        assert_eq!(report.workload_errors.len(), 2);
        assert_eq!(report.activated, 1);

        let bad = balancer.workload("bad").await.unwrap();
        assert!(bad.last_error.unwrap().contains("数据验证失败"));
        let huge = balancer.workload("huge").await.unwrap();
        assert!(huge.last_error.unwrap().contains("资源不足"));
    }

    #[tokio::test]
    async fn test_priority_claims_capacity_first() {
        let (balancer, _) = balancer();
        balancer
            .register_node(NodeSpec::new("n1", capacity()))
            .await
            .unwrap();
        balancer
            .register_workload(WorkloadSpec::new(
                "low",
                ResourceVector::new(3.0, 1.0, 0.0, 0.0),
                1,
            ))
            .await
            .unwrap();
        balancer
            .register_workload(WorkloadSpec::new(
                "high",
                ResourceVector::new(3.0, 1.0, 0.0, 0.0),
                10,
            ))
            .await
            .unwrap();

        let report = balancer.balance().await.unwrap();
        assert_eq!(report.activated, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(balancer.allocations_for("high").await.len(), 1);
        assert!(balancer.allocations_for("low").await.is_empty());
    }

    #[tokio::test]
    async fn test_node_goes_offline_and_allocations_fail() {
        let (balancer, clock) = balancer();
        balancer
            .register_node(NodeSpec::new("n1", capacity()))
            .await
            .unwrap();
        balancer
            .register_node(NodeSpec::new("n2", capacity()))
            .await
            .unwrap();
        balancer
            .register_workload(WorkloadSpec::new(
                "w1",
                ResourceVector::new(1.0, 1.0, 0.0, 0.0),
                1,
            ))
            .await
            .unwrap();
        balancer.balance().await.unwrap();

        clock.advance(Duration::from_secs(45));
        balancer.heartbeat("n2", 0.2).await.unwrap();
        clock.advance(Duration::from_secs(30));

        let report = balancer.balance().await.unwrap();
        assert_eq!(report.nodes_offline, vec!["n1"]);
        assert_eq!(
            balancer.node("n1").await.unwrap().status,
            NodeStatus::Offline
        );

        let allocations = balancer.allocations_for("w1").await;
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].node_id, "n2");
        assert!(balancer
            .allocation_log()
            .await
            .iter()
            .any(|a| a.node_id == "n1" && a.status == AllocationStatus::Failed));

        // 心跳恢复
        balancer.heartbeat("n1", 0.1).await.unwrap();
        assert_eq!(
            balancer.node("n1").await.unwrap().status,
            NodeStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_busy_node_receives_no_allocation() {
        let (balancer, _) = balancer();
        for id in ["n1", "n2"] {
            balancer
                .register_node(NodeSpec::new(id, capacity()))
                .await
                .unwrap();
        }
        balancer.heartbeat("n1", 0.8).await.unwrap();
        balancer
            .register_workload(WorkloadSpec::new(
                "w1",
                ResourceVector::new(1.0, 1.0, 0.0, 0.0),
                1,
            ))
            .await
            .unwrap();

        let report = balancer.balance().await.unwrap();
        assert_eq!(report.activated, 1);
        let allocations = balancer.allocations_for("w1").await;
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].node_id, "n2");

        // 只剩 busy 节点时没有可用容量
        balancer.heartbeat("n2", 0.75).await.unwrap();
        let report = balancer.balance().await.unwrap();
        assert_eq!(report.workload_errors.len(), 1);
        assert!(report.workload_errors[0].1.contains("没有可用节点"));
    }

    #[tokio::test]
    async fn test_heartbeat_classifies_status() {
        let (balancer, _) = balancer();
        balancer
            .register_node(NodeSpec::new("n1", capacity()))
            .await
            .unwrap();

        balancer.heartbeat("n1", 0.8).await.unwrap();
        let node = balancer.node("n1").await.unwrap();
        assert_eq!(node.status, NodeStatus::Busy);
        assert!((node.health - 0.75).abs() < 1e-9);

        balancer.heartbeat("n1", 1.7).await.unwrap();
        let node = balancer.node("n1").await.unwrap();
        assert_eq!(node.status, NodeStatus::Overloaded);
        assert_eq!(node.load, 1.0);
        assert_eq!(node.health, 0.0);

        let err = balancer.heartbeat("missing", 0.5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_scale_resource() {
        let (balancer, _) = balancer();
        balancer
            .register_node(NodeSpec::new("n1", capacity()))
            .await
            .unwrap();
        balancer.heartbeat("n1", 0.8).await.unwrap();

        balancer.scale_resource("n1", 2.0).await.unwrap();
        assert!((balancer.resource_pressure("n1").await.unwrap() - 0.4).abs() < 1e-9);

        // 缩容后负载不超过 max_load
        balancer.scale_resource("n1", 0.1).await.unwrap();
        assert!((balancer.resource_pressure("n1").await.unwrap() - 0.9).abs() < 1e-9);

        let err = balancer.scale_resource("n1", 0.0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = balancer.scale_resource("nope", 2.0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_metrics_variance_and_imbalance() {
        let (balancer, _) = balancer();
        for id in ["n1", "n2"] {
            balancer
                .register_node(NodeSpec::new(id, capacity()))
                .await
                .unwrap();
        }
        balancer.heartbeat("n1", 0.2).await.unwrap();
        balancer.heartbeat("n2", 0.8).await.unwrap();

        let report = balancer.balance().await.unwrap();
        assert!((report.imbalance - 0.75).abs() < 1e-9);
        assert!((report.load_variance - 0.09).abs() < 1e-9);

        let metrics = balancer.metrics().await;
        assert_eq!(metrics.healthy, 1);
        assert_eq!(metrics.busy, 1);
        assert_eq!(balancer.metric_points().await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_and_deregister() {
        let (balancer, _) = balancer();
        balancer
            .register_node(NodeSpec::new("n1", capacity()))
            .await
            .unwrap();
        balancer
            .register_workload(WorkloadSpec::new(
                "w1",
                ResourceVector::new(1.0, 1.0, 0.0, 0.0),
                1,
            ))
            .await
            .unwrap();
        balancer.balance().await.unwrap();

        balancer.remove_workload("w1").await.unwrap();
        assert!(balancer.allocations_for("w1").await.is_empty());
        assert!(balancer.workload("w1").await.is_none());

        balancer.deregister_node("n1").await.unwrap();
        let err = balancer.deregister_node("n1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
