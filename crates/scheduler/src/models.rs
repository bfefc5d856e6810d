use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Executing,
    Completed,
    Failed,
    Retry,
    Timeout,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout
        )
    }

    /// 在队列中等待派发（含等待重试）
    pub fn is_waiting(&self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Retry)
    }
}

/// 调度单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// 0 为最高优先级
    pub priority: usize,
    pub status: TaskStatus,
    pub dependencies: Vec<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub retries: u32,
    pub flow_id: Option<String>,
    pub executor_id: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new<S: Into<String>>(id: S, priority: usize) -> Self {
        Self {
            id: id.into(),
            priority,
            status: TaskStatus::Queued,
            dependencies: Vec::new(),
            deadline: None,
            retries: 0,
            flow_id: None,
            executor_id: None,
            last_error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            next_attempt_at: None,
        }
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_flow<S: Into<String>>(mut self, flow_id: S) -> Self {
        self.flow_id = Some(flow_id.into());
        self
    }

    /// 从创建到结束的耗时（毫秒），未结束时为 None
    pub fn latency_ms(&self) -> Option<f64> {
        self.finished_at
            .map(|finished| (finished - self.created_at).num_milliseconds().max(0) as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub timed_out: u64,
}

/// 单一优先级的有界 FIFO 队列，只保存任务ID
///
/// 任务在进入终态之前一直留在队列中（包括执行中和等待重试）。
#[derive(Debug, Clone)]
pub struct TaskQueue {
    pub priority: usize,
    pub capacity: usize,
    pub stats: QueueStats,
    tasks: VecDeque<String>,
}

impl TaskQueue {
    pub fn new(priority: usize, capacity: usize) -> Self {
        Self {
            priority,
            capacity,
            stats: QueueStats::default(),
            tasks: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tasks.len() >= self.capacity
    }

    /// 队列已满时返回 false
    pub fn push(&mut self, task_id: String) -> bool {
        if self.is_full() {
            return false;
        }
        self.tasks.push_back(task_id);
        self.stats.enqueued += 1;
        true
    }

    pub fn remove(&mut self, task_id: &str) -> bool {
        match self.tasks.iter().position(|id| id == task_id) {
            Some(index) => {
                self.tasks.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.tasks.iter()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            priority: self.priority,
            len: self.tasks.len(),
            capacity: self.capacity,
            stats: self.stats.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub priority: usize,
    pub len: usize,
    pub capacity: usize,
    pub stats: QueueStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSpec {
    pub id: String,
    pub capacity: usize,
}

impl ExecutorSpec {
    pub fn new<S: Into<String>>(id: S, capacity: usize) -> Self {
        Self {
            id: id.into(),
            capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub duration_ms: f64,
}

/// 执行器及其滚动表现
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Executor {
    pub id: String,
    pub capacity: usize,
    pub load: usize,
    pub degraded: bool,
    samples: VecDeque<PerformanceSample>,
}

impl Executor {
    pub fn new(spec: ExecutorSpec) -> Self {
        Self {
            id: spec.id,
            capacity: spec.capacity,
            load: 0,
            degraded: false,
            samples: VecDeque::new(),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.load < self.capacity
    }

    pub fn load_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        self.load as f64 / self.capacity as f64
    }

    pub fn is_available(&self) -> bool {
        !self.degraded && self.has_capacity()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn success_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 1.0;
        }
        let successes = self.samples.iter().filter(|s| s.success).count();
        successes as f64 / self.samples.len() as f64
    }

    pub fn error_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        1.0 - self.success_rate()
    }

    pub fn average_duration_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.duration_ms).sum::<f64>() / self.samples.len() as f64
    }

    pub(crate) fn record(&mut self, sample: PerformanceSample) {
        self.samples.push_back(sample);
    }

    /// 丢弃窗口外的样本并重新判定降级状态，返回状态是否发生变化
    pub(crate) fn refresh(
        &mut self,
        now: DateTime<Utc>,
        window: chrono::Duration,
        min_samples: usize,
    ) -> bool {
        let cutoff = now - window;
        while self
            .samples
            .front()
            .is_some_and(|sample| sample.timestamp < cutoff)
        {
            self.samples.pop_front();
        }

        let degraded = self.samples.len() >= min_samples
            && (self.error_rate() > 0.5 || self.success_rate() < 0.3);
        let changed = degraded != self.degraded;
        self.degraded = degraded;
        changed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Normal,
    Throttled,
}

/// 进入调度器的命名通道
///
/// 每个周期累积 `throughput` 的派发额度，派发一个任务消耗 1。
/// 吞吐量低于 1 时额度跨周期累积，所以限流后的流仍然会前进。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub base_throughput: f64,
    pub throughput: f64,
    #[serde(default)]
    pub credit: f64,
    pub status: FlowStatus,
}

impl Flow {
    pub fn new<S: Into<String>>(id: S, throughput: f64) -> Self {
        Self {
            id: id.into(),
            base_throughput: throughput,
            throughput,
            credit: 0.0,
            status: FlowStatus::Normal,
        }
    }

    /// 周期开始时累积额度，上限为吞吐量加 1
    pub fn accrue(&mut self) {
        let throughput = self.throughput.max(0.0);
        self.credit = (self.credit + throughput).min(throughput + 1.0);
    }

    /// 本周期还能派发的任务数
    pub fn dispatch_budget(&self) -> usize {
        self.credit.max(0.0).floor() as usize
    }

    /// 额度足够时消耗 1 并返回 true
    pub fn try_spend(&mut self) -> bool {
        if self.credit >= 1.0 {
            self.credit -= 1.0;
            true
        } else {
            false
        }
    }

    /// 调整吞吐量，累积的额度不超过新的吞吐量
    pub fn set_throughput(&mut self, throughput: f64) {
        self.throughput = throughput;
        self.credit = self.credit.min(throughput.max(0.0));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub samples: usize,
    pub average_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencyStats {
    pub fn from_samples(mut samples: Vec<f64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = samples.len();
        let average_ms = samples.iter().sum::<f64>() / count as f64;
        Self {
            samples: count,
            average_ms,
            p95_ms: percentile(&samples, 0.95),
            p99_ms: percentile(&samples, 0.99),
            max_ms: samples[count - 1],
        }
    }
}

/// 已排序样本的百分位查找
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() as f64) * p) as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// 一次派发周期的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchReport {
    /// 按派发顺序排列的任务ID
    pub dispatched: Vec<String>,
    pub completed: Vec<String>,
    pub retried: Vec<String>,
    pub failed: Vec<String>,
    pub timed_out: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerMetrics {
    pub total: usize,
    pub queued: usize,
    pub executing: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// completed / (completed + failed + timeout)，尚无终态任务时为 0
    pub success_rate: f64,
    pub average_executor_load: f64,
}
