use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use controlplane_config::SchedulerConfig;
use controlplane_core::{
    to_chrono, Clock, ControlPlaneError, ControlPlaneResult, HistoryEntry, MetricPoint,
    MetricsSink, NoopMetricsSink, RingBuffer, SystemClock,
};

use crate::models::{
    DispatchReport, Executor, ExecutorSpec, Flow, FlowStatus, LatencyStats, PerformanceSample,
    QueueSnapshot, SchedulerMetrics, Task, TaskQueue, TaskStatus,
};
use crate::retry_service::RetryPolicy;
use crate::runner::{SimulatedRunner, TaskRunner};
use crate::strategies::select_least_loaded;

pub const COMPONENT: &str = "scheduler";

struct SchedulerState {
    tasks: HashMap<String, Task>,
    queues: Vec<TaskQueue>,
    executors: BTreeMap<String, Executor>,
    flows: HashMap<String, Flow>,
    /// 已进入终态的任务ID，按完成顺序
    finished: VecDeque<String>,
    finished_capacity: usize,
    latency: LatencyStats,
    history: RingBuffer<HistoryEntry>,
    metric_points: RingBuffer<MetricPoint>,
}

enum DependencyState {
    Ready,
    Waiting,
    Broken(String),
}

enum Verdict {
    Skip,
    Timeout,
    DependencyFailed(String),
    Eligible(Option<String>),
}

struct PlannedDispatch {
    task: Task,
    executor_id: String,
}

impl SchedulerState {
    fn new(config: &SchedulerConfig) -> Self {
        Self {
            tasks: HashMap::new(),
            queues: (0..config.priority_levels)
                .map(|priority| TaskQueue::new(priority, config.queue_capacity))
                .collect(),
            executors: BTreeMap::new(),
            flows: HashMap::new(),
            finished: VecDeque::new(),
            finished_capacity: config.history_size,
            latency: LatencyStats::default(),
            history: RingBuffer::with_capacity(config.history_size),
            metric_points: RingBuffer::with_capacity(config.history_size),
        }
    }

    fn record(&mut self, now: DateTime<Utc>, subject: &str, event: &str, detail: Option<String>) {
        let mut entry = HistoryEntry::new(now, subject, event);
        entry.detail = detail;
        self.history.push(entry);
    }

    fn enqueued_total(&self) -> usize {
        self.queues.iter().map(TaskQueue::len).sum()
    }

    fn average_executor_load(&self) -> f64 {
        if self.executors.is_empty() {
            return 0.0;
        }
        self.executors.values().map(Executor::load_ratio).sum::<f64>()
            / self.executors.len() as f64
    }

    fn dependency_state(&self, task: &Task) -> DependencyState {
        let mut ready = true;
        for dependency in &task.dependencies {
            match self.tasks.get(dependency).map(|t| t.status) {
                Some(TaskStatus::Completed) => {}
                Some(status @ (TaskStatus::Failed | TaskStatus::Timeout)) => {
                    return DependencyState::Broken(format!(
                        "依赖任务 {dependency} 已终止: {status:?}"
                    ));
                }
                _ => ready = false,
            }
        }
        if ready {
            DependencyState::Ready
        } else {
            DependencyState::Waiting
        }
    }

    /// 将任务置为终态并移出队列
    fn finish(&mut self, task_id: &str, status: TaskStatus, now: DateTime<Utc>) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        task.status = status;
        task.finished_at = Some(now);
        task.next_attempt_at = None;
        let priority = task.priority;

        if let Some(queue) = self.queues.get_mut(priority) {
            queue.remove(task_id);
            match status {
                TaskStatus::Completed => queue.stats.completed += 1,
                TaskStatus::Failed => queue.stats.failed += 1,
                TaskStatus::Timeout => queue.stats.timed_out += 1,
                _ => {}
            }
        }

        self.finished.push_back(task_id.to_string());
        self.evict_finished();
    }

    /// 终态任务只保留最近的窗口，仍被等待中任务依赖的不淘汰
    fn evict_finished(&mut self) {
        while self.finished.len() > self.finished_capacity {
            let position = {
                let pinned: HashSet<&str> = self
                    .tasks
                    .values()
                    .filter(|task| task.status.is_waiting())
                    .flat_map(|task| task.dependencies.iter().map(String::as_str))
                    .collect();
                self.finished
                    .iter()
                    .position(|id| !pinned.contains(id.as_str()))
            };
            let Some(position) = position else {
                break;
            };
            if let Some(id) = self.finished.remove(position) {
                self.tasks.remove(&id);
            }
        }
    }

    fn flow_backlog(&self, flow_id: &str) -> usize {
        self.tasks
            .values()
            .filter(|task| task.flow_id.as_deref() == Some(flow_id) && task.status.is_waiting())
            .count()
    }

    /// 积压清空的限流流自动恢复基准吞吐量
    fn restore_drained_flows(&mut self, now: DateTime<Utc>) {
        let drained: Vec<String> = self
            .flows
            .values()
            .filter(|flow| flow.status == FlowStatus::Throttled)
            .filter(|flow| self.flow_backlog(&flow.id) == 0)
            .map(|flow| flow.id.clone())
            .collect();

        for flow_id in drained {
            if let Some(flow) = self.flows.get_mut(&flow_id) {
                let base = flow.base_throughput;
                flow.set_throughput(base);
                flow.status = FlowStatus::Normal;
            }
            self.record(now, &flow_id, "flow_restored", Some("backlog_drained".to_string()));
            info!("流 {} 积压已清空，恢复基准吞吐量", flow_id);
        }
    }

    fn metrics(&self) -> SchedulerMetrics {
        let mut metrics = SchedulerMetrics {
            average_executor_load: self.average_executor_load(),
            ..Default::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Queued => metrics.queued += 1,
                TaskStatus::Executing => metrics.executing += 1,
                TaskStatus::Retry => metrics.retrying += 1,
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout => {}
            }
        }
        // 终态计数来自队列的累计统计，不受淘汰影响
        for queue in &self.queues {
            metrics.completed += queue.stats.completed as usize;
            metrics.failed += queue.stats.failed as usize;
            metrics.timed_out += queue.stats.timed_out as usize;
        }
        let finished = metrics.completed + metrics.failed + metrics.timed_out;
        metrics.total = metrics.queued + metrics.executing + metrics.retrying + finished;
        if finished > 0 {
            metrics.success_rate = metrics.completed as f64 / finished as f64;
        }
        metrics
    }

    fn recompute_latency(&mut self) {
        let samples = self
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Completed)
            .filter_map(Task::latency_ms)
            .collect();
        self.latency = LatencyStats::from_samples(samples);
    }
}

/// 任务调度器
///
/// 按优先级准入、派发和重试任务。所有状态由一把读写锁保护，
/// 任务的实际执行在释放锁之后并发进行。
#[derive(Clone)]
pub struct TaskScheduler {
    config: Arc<SchedulerConfig>,
    state: Arc<RwLock<SchedulerState>>,
    clock: Arc<dyn Clock>,
    runner: Arc<dyn TaskRunner>,
    metrics_sink: Arc<dyn MetricsSink>,
    retry_policy: RetryPolicy,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        let state = SchedulerState::new(&config);
        let runner: Arc<dyn TaskRunner> = Arc::new(SimulatedRunner::new(config.simulated_work()));
        let retry_policy = RetryPolicy::new(config.retry.clone());
        Self {
            config: Arc::new(config),
            state: Arc::new(RwLock::new(state)),
            clock,
            runner,
            metrics_sink: Arc::new(NoopMetricsSink),
            retry_policy,
        }
    }

    pub fn with_system_clock(config: SchedulerConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn with_runner(mut self, runner: Arc<dyn TaskRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = sink;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub async fn register_executor(&self, spec: ExecutorSpec) -> ControlPlaneResult<()> {
        if spec.id.trim().is_empty() {
            return Err(ControlPlaneError::validation("执行器ID不能为空"));
        }
        if spec.capacity == 0 {
            return Err(ControlPlaneError::validation(format!(
                "执行器 {} 的容量必须大于0",
                spec.id
            )));
        }

        let now = self.clock.now();
        let mut state = self.state.write().await;
        if state.executors.contains_key(&spec.id) {
            return Err(ControlPlaneError::validation(format!(
                "执行器 {} 已存在",
                spec.id
            )));
        }
        let id = spec.id.clone();
        let detail = format!("capacity={}", spec.capacity);
        state.executors.insert(id.clone(), Executor::new(spec));
        state.record(now, &id, "executor_registered", Some(detail));

        info!("注册执行器: {}", id);
        Ok(())
    }

    pub async fn register_flow(&self, flow_id: &str, throughput: f64) -> ControlPlaneResult<()> {
        if flow_id.trim().is_empty() {
            return Err(ControlPlaneError::validation("流ID不能为空"));
        }
        if !throughput.is_finite() || throughput < 0.0 {
            return Err(ControlPlaneError::validation(format!(
                "流 {flow_id} 的吞吐量必须为非负数: {throughput}"
            )));
        }

        let now = self.clock.now();
        let mut state = self.state.write().await;
        if state.flows.contains_key(flow_id) {
            return Err(ControlPlaneError::validation(format!("流 {flow_id} 已存在")));
        }
        state
            .flows
            .insert(flow_id.to_string(), Flow::new(flow_id, throughput));
        state.record(
            now,
            flow_id,
            "flow_registered",
            Some(format!("throughput={throughput}")),
        );

        info!("注册流: {} (吞吐量: {})", flow_id, throughput);
        Ok(())
    }

    /// 提交任务
    ///
    /// 入队时以调度器时钟重置创建时间，状态固定为 queued。
    pub async fn schedule(&self, mut task: Task) -> ControlPlaneResult<()> {
        self.validate_task(&task)?;

        let now = self.clock.now();
        let mut state = self.state.write().await;

        if state.tasks.contains_key(&task.id) {
            return Err(ControlPlaneError::validation(format!(
                "任务 {} 已存在",
                task.id
            )));
        }
        if let Some(flow_id) = &task.flow_id {
            if !state.flows.contains_key(flow_id) {
                return Err(ControlPlaneError::not_found("流", flow_id.clone()));
            }
        }

        let enqueued = state.enqueued_total();
        if enqueued >= self.config.max_tasks {
            counter!("controlplane_scheduler_rejected_total", "reason" => "max_tasks").increment(1);
            warn!("任务 {} 被拒绝: 排队任务数 {} 已达上限", task.id, enqueued);
            return Err(ControlPlaneError::resource(format!(
                "排队任务数已达上限 {}",
                self.config.max_tasks
            )));
        }

        let average_load = state.average_executor_load();
        if average_load > self.config.admission_load_limit {
            counter!("controlplane_scheduler_rejected_total", "reason" => "executor_load")
                .increment(1);
            warn!(
                "任务 {} 被拒绝: 执行器平均负载 {:.2} 超过 {:.2}",
                task.id, average_load, self.config.admission_load_limit
            );
            return Err(ControlPlaneError::resource(format!(
                "执行器平均负载过高: {average_load:.2}"
            )));
        }

        if state.queues[task.priority].is_full() {
            counter!("controlplane_scheduler_rejected_total", "reason" => "queue_full")
                .increment(1);
            return Err(ControlPlaneError::resource(format!(
                "优先级 {} 的队列已满",
                task.priority
            )));
        }

        task.status = TaskStatus::Queued;
        task.retries = 0;
        task.created_at = now;
        task.started_at = None;
        task.finished_at = None;
        task.next_attempt_at = None;
        task.executor_id = None;
        task.last_error = None;

        let id = task.id.clone();
        let priority = task.priority;
        state.queues[priority].push(id.clone());
        state.tasks.insert(id.clone(), task);
        state.record(now, &id, "scheduled", Some(format!("priority={priority}")));

        debug!("任务 {} 已加入优先级 {} 队列", id, priority);
        Ok(())
    }

    fn validate_task(&self, task: &Task) -> ControlPlaneResult<()> {
        if task.id.trim().is_empty() {
            return Err(ControlPlaneError::validation("任务ID不能为空"));
        }
        if task.priority >= self.config.priority_levels {
            return Err(ControlPlaneError::validation(format!(
                "任务 {} 的优先级 {} 超出范围 0..{}",
                task.id, task.priority, self.config.priority_levels
            )));
        }
        if task.dependencies.iter().any(|d| d == &task.id) {
            return Err(ControlPlaneError::validation(format!(
                "任务 {} 不能依赖自身",
                task.id
            )));
        }
        Ok(())
    }

    /// 运行一个派发周期
    pub async fn execute(&self) -> ControlPlaneResult<DispatchReport> {
        let mut report = DispatchReport::default();
        let planned = self.plan_dispatch(&mut report).await?;

        let results = join_all(
            planned
                .iter()
                .map(|dispatch| self.runner.run(&dispatch.task, &dispatch.executor_id)),
        )
        .await;

        let now = self.clock.now();
        let mut state = self.state.write().await;
        let window = to_chrono(self.config.performance_window());

        for (dispatch, result) in planned.into_iter().zip(results) {
            let task_id = dispatch.task.id.clone();
            let duration_ms = dispatch
                .task
                .started_at
                .map(|started| (now - started).num_milliseconds().max(0) as f64)
                .unwrap_or(0.0);

            if let Some(executor) = state.executors.get_mut(&dispatch.executor_id) {
                executor.load = executor.load.saturating_sub(1);
                executor.record(PerformanceSample {
                    timestamp: now,
                    success: result.is_ok(),
                    duration_ms,
                });
                if executor.refresh(now, window, self.config.degradation_min_samples)
                    && executor.degraded
                {
                    warn!("执行器 {} 已降级", executor.id);
                }
            }

            match result {
                Ok(()) => {
                    state.finish(&task_id, TaskStatus::Completed, now);
                    state.record(now, &task_id, "completed", None);
                    report.completed.push(task_id);
                }
                Err(e) => {
                    let retry_limit = self.config.retry_limit;
                    let Some(task) = state.tasks.get_mut(&task_id) else {
                        continue;
                    };
                    task.retries += 1;
                    task.last_error = Some(e.to_string());
                    let retries = task.retries;

                    if retries >= retry_limit {
                        state.finish(&task_id, TaskStatus::Failed, now);
                        state.record(now, &task_id, "failed", Some(e.to_string()));
                        error!("任务 {} 重试 {} 次后失败: {}", task_id, retries, e);
                        report.failed.push(task_id);
                    } else {
                        let next_attempt = self.retry_policy.next_attempt_at(now, retries);
                        task.status = TaskStatus::Retry;
                        task.next_attempt_at = Some(next_attempt);
                        task.executor_id = None;
                        let priority = task.priority;
                        if let Some(queue) = state.queues.get_mut(priority) {
                            queue.stats.retried += 1;
                        }
                        state.record(
                            now,
                            &task_id,
                            "retry",
                            Some(format!("attempt={retries} error={e}")),
                        );
                        warn!("任务 {} 执行失败，将第 {} 次重试: {}", task_id, retries, e);
                        report.retried.push(task_id);
                    }
                }
            }
        }

        state.restore_drained_flows(now);
        state.recompute_latency();
        let point = self.metric_point(&state, now, &report);
        state.metric_points.push(point.clone());
        drop(state);

        self.metrics_sink.record(&point);

        if !report.dispatched.is_empty() || !report.timed_out.is_empty() {
            info!(
                "调度周期完成: 派发 {}，完成 {}，重试 {}，失败 {}，超时 {}",
                report.dispatched.len(),
                report.completed.len(),
                report.retried.len(),
                report.failed.len(),
                report.timed_out.len()
            );
        }

        Ok(report)
    }

    /// 在写锁内选出本周期要派发的任务并占用执行器容量
    async fn plan_dispatch(
        &self,
        report: &mut DispatchReport,
    ) -> ControlPlaneResult<Vec<PlannedDispatch>> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let window = to_chrono(self.config.performance_window());

        let mut transitions = Vec::new();
        for executor in state.executors.values_mut() {
            if executor.refresh(now, window, self.config.degradation_min_samples) {
                transitions.push((executor.id.clone(), executor.degraded));
            }
        }
        for (executor_id, degraded) in transitions {
            let event = if degraded {
                "executor_degraded"
            } else {
                "executor_recovered"
            };
            info!("执行器 {} 状态变化: {}", executor_id, event);
            state.record(now, &executor_id, event, None);
        }

        if !state.executors.values().any(|executor| !executor.degraded) {
            error!("没有可用的执行器，跳过本次调度周期");
            state.record(now, COMPONENT, "no_executor", None);
            return Err(ControlPlaneError::resource("没有可用的执行器"));
        }

        for flow in state.flows.values_mut() {
            flow.accrue();
        }
        let mut planned = Vec::new();
        let mut capacity_exhausted = false;

        for priority in 0..state.queues.len() {
            let ids: Vec<String> = state.queues[priority].ids().cloned().collect();
            for id in ids {
                let verdict = match state.tasks.get(&id) {
                    None => Verdict::Skip,
                    Some(task) if !task.status.is_waiting() => Verdict::Skip,
                    Some(task) if task.deadline.is_some_and(|deadline| now > deadline) => {
                        Verdict::Timeout
                    }
                    Some(task) => match state.dependency_state(task) {
                        DependencyState::Broken(reason) => Verdict::DependencyFailed(reason),
                        DependencyState::Waiting => Verdict::Skip,
                        DependencyState::Ready => {
                            if task.next_attempt_at.is_some_and(|at| at > now) {
                                Verdict::Skip
                            } else {
                                Verdict::Eligible(task.flow_id.clone())
                            }
                        }
                    },
                };

                match verdict {
                    Verdict::Skip => {}
                    Verdict::Timeout => {
                        state.finish(&id, TaskStatus::Timeout, now);
                        state.record(now, &id, "timeout", None);
                        warn!("任务 {} 已超过截止时间", id);
                        report.timed_out.push(id);
                    }
                    Verdict::DependencyFailed(reason) => {
                        let error = ControlPlaneError::dependency(reason);
                        if let Some(task) = state.tasks.get_mut(&id) {
                            task.last_error = Some(error.to_string());
                        }
                        state.finish(&id, TaskStatus::Failed, now);
                        state.record(now, &id, "dependency_failed", Some(error.to_string()));
                        warn!("任务 {} 因依赖失败而终止: {}", id, error);
                        report.failed.push(id);
                    }
                    Verdict::Eligible(flow_id) => {
                        if capacity_exhausted {
                            continue;
                        }
                        if let Some(flow_id) = &flow_id {
                            let has_credit = state
                                .flows
                                .get(flow_id)
                                .is_some_and(|flow| flow.dispatch_budget() > 0);
                            if !has_credit {
                                continue;
                            }
                        }
                        let Some(executor_id) =
                            select_least_loaded(state.executors.values()).map(|e| e.id.clone())
                        else {
                            capacity_exhausted = true;
                            continue;
                        };

                        if let Some(flow_id) = &flow_id {
                            if let Some(flow) = state.flows.get_mut(flow_id) {
                                flow.try_spend();
                            }
                        }
                        if let Some(executor) = state.executors.get_mut(&executor_id) {
                            executor.load += 1;
                        }
                        let Some(task) = state.tasks.get_mut(&id) else {
                            continue;
                        };
                        task.status = TaskStatus::Executing;
                        task.started_at = Some(now);
                        task.executor_id = Some(executor_id.clone());
                        task.next_attempt_at = None;
                        let snapshot = task.clone();
                        state.queues[priority].stats.dispatched += 1;
                        state.record(now, &id, "dispatched", Some(executor_id.clone()));

                        report.dispatched.push(id);
                        planned.push(PlannedDispatch {
                            task: snapshot,
                            executor_id,
                        });
                    }
                }
            }
        }

        Ok(planned)
    }

    fn metric_point(
        &self,
        state: &SchedulerState,
        now: DateTime<Utc>,
        report: &DispatchReport,
    ) -> MetricPoint {
        let metrics = state.metrics();
        MetricPoint::new(COMPONENT, now)
            .with_value("queued", metrics.queued as f64)
            .with_value("executing", metrics.executing as f64)
            .with_value("retrying", metrics.retrying as f64)
            .with_value("completed", metrics.completed as f64)
            .with_value("failed", metrics.failed as f64)
            .with_value("timed_out", metrics.timed_out as f64)
            .with_value("success_rate", metrics.success_rate)
            .with_value("executor_load", metrics.average_executor_load)
            .with_value("dispatched", report.dispatched.len() as f64)
            .with_value("latency_avg_ms", state.latency.average_ms)
            .with_value("latency_p95_ms", state.latency.p95_ms)
            .with_value("latency_p99_ms", state.latency.p99_ms)
            .with_value("latency_max_ms", state.latency.max_ms)
    }

    /// 流压力 = min(1, 积压 / 当前吞吐量)
    pub async fn flow_pressure(&self, flow_id: &str) -> ControlPlaneResult<f64> {
        let state = self.state.read().await;
        let flow = state
            .flows
            .get(flow_id)
            .ok_or_else(|| ControlPlaneError::not_found("流", flow_id))?;

        let backlog = state.flow_backlog(flow_id) as f64;
        if flow.throughput <= 0.0 {
            return Ok(if backlog > 0.0 { 1.0 } else { 0.0 });
        }
        Ok((backlog / flow.throughput).min(1.0))
    }

    /// 执行器压力 = 已占用槽位 / 容量
    pub async fn executor_pressure(&self, executor_id: &str) -> ControlPlaneResult<f64> {
        self.state
            .read()
            .await
            .executors
            .get(executor_id)
            .map(Executor::load_ratio)
            .ok_or_else(|| ControlPlaneError::not_found("执行器", executor_id))
    }

    /// 按比例降低流的吞吐量
    pub async fn throttle_flow(&self, flow_id: &str, rate: f64) -> ControlPlaneResult<()> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(ControlPlaneError::validation(format!(
                "限流比例必须在 [0, 1] 内: {rate}"
            )));
        }

        let now = self.clock.now();
        let mut state = self.state.write().await;
        let flow = state
            .flows
            .get_mut(flow_id)
            .ok_or_else(|| ControlPlaneError::not_found("流", flow_id))?;
        let throttled = flow.throughput * rate;
        flow.set_throughput(throttled);
        flow.status = FlowStatus::Throttled;
        let throughput = flow.throughput;
        state.record(
            now,
            flow_id,
            "flow_throttled",
            Some(format!("rate={rate} throughput={throughput}")),
        );

        info!("流 {} 已限流，当前吞吐量 {:.2}", flow_id, throughput);
        Ok(())
    }

    /// 恢复流的基准吞吐量
    pub async fn restore_flow(&self, flow_id: &str) -> ControlPlaneResult<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let flow = state
            .flows
            .get_mut(flow_id)
            .ok_or_else(|| ControlPlaneError::not_found("流", flow_id))?;
        let base = flow.base_throughput;
        flow.set_throughput(base);
        flow.status = FlowStatus::Normal;
        state.record(now, flow_id, "flow_restored", None);

        info!("流 {} 已恢复基准吞吐量", flow_id);
        Ok(())
    }

    pub async fn task(&self, task_id: &str) -> Option<Task> {
        self.state.read().await.tasks.get(task_id).cloned()
    }

    pub async fn executor(&self, executor_id: &str) -> Option<Executor> {
        self.state.read().await.executors.get(executor_id).cloned()
    }

    pub async fn flow(&self, flow_id: &str) -> Option<Flow> {
        self.state.read().await.flows.get(flow_id).cloned()
    }

    pub async fn queue_stats(&self) -> Vec<QueueSnapshot> {
        self.state
            .read()
            .await
            .queues
            .iter()
            .map(TaskQueue::snapshot)
            .collect()
    }

    pub async fn latency_stats(&self) -> LatencyStats {
        self.state.read().await.latency.clone()
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.state.read().await.history.to_vec()
    }

    pub async fn metric_points(&self) -> Vec<MetricPoint> {
        self.state.read().await.metric_points.to_vec()
    }

    pub async fn metrics(&self) -> SchedulerMetrics {
        self.state.read().await.metrics()
    }
}
