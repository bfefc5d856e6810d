use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use controlplane_config::GovernorConfig;
use controlplane_core::{
    to_chrono, ActionSink, Clock, ControlPlaneError, ControlPlaneResult, HistoryEntry,
    MetricPoint, MetricsSink, NoopMetricsSink, PressureSource, PressureTarget, RingBuffer,
    SystemClock,
};

use crate::analysis::{compute_stats, evaluate};
use crate::models::{
    ActionKind, LimitKind, Monitor, MonitorReport, MonitorStats, Pressure, PressureStatus, Sample,
    Threshold, ThresholdAction, Trend,
};

pub const COMPONENT: &str = "governor";

struct GovernorState {
    monitors: BTreeMap<String, Monitor>,
    thresholds: BTreeMap<String, Threshold>,
    /// (阈值ID, 动作序号) → 上次执行时间
    cooldowns: HashMap<(String, usize), DateTime<Utc>>,
    actions_executed: u64,
    actions_failed: u64,
    history: RingBuffer<HistoryEntry>,
    metric_points: RingBuffer<MetricPoint>,
}

/// 已通过冷却检查、等待执行的动作
struct PendingAction {
    threshold_id: String,
    monitor_id: String,
    target: PressureTarget,
    action: ThresholdAction,
    pressure: Pressure,
}

impl GovernorState {
    fn new(config: &GovernorConfig) -> Self {
        Self {
            monitors: BTreeMap::new(),
            thresholds: BTreeMap::new(),
            cooldowns: HashMap::new(),
            actions_executed: 0,
            actions_failed: 0,
            history: RingBuffer::with_capacity(config.history_size),
            metric_points: RingBuffer::with_capacity(config.history_size),
        }
    }

    fn record(&mut self, now: DateTime<Utc>, subject: &str, event: &str, detail: Option<String>) {
        let mut entry = HistoryEntry::new(now, subject, event);
        entry.detail = detail;
        self.history.push(entry);
    }
}

/// 背压治理器
///
/// 按滑动窗口采样各监控目标的压力，分级后依据阈值策略触发限流、扩容或通知动作。
/// 采样和动作都通过注入的接口完成，调用期间不持有内部锁。
#[derive(Clone)]
pub struct BackpressureGovernor {
    config: Arc<GovernorConfig>,
    state: Arc<RwLock<GovernorState>>,
    clock: Arc<dyn Clock>,
    source: Arc<dyn PressureSource>,
    actions: Arc<dyn ActionSink>,
    metrics_sink: Arc<dyn MetricsSink>,
}

impl BackpressureGovernor {
    pub fn new(
        config: GovernorConfig,
        clock: Arc<dyn Clock>,
        source: Arc<dyn PressureSource>,
        actions: Arc<dyn ActionSink>,
    ) -> Self {
        let state = GovernorState::new(&config);
        Self {
            config: Arc::new(config),
            state: Arc::new(RwLock::new(state)),
            clock,
            source,
            actions,
            metrics_sink: Arc::new(NoopMetricsSink),
        }
    }

    pub fn with_system_clock(
        config: GovernorConfig,
        source: Arc<dyn PressureSource>,
        actions: Arc<dyn ActionSink>,
    ) -> Self {
        Self::new(config, Arc::new(SystemClock), source, actions)
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = sink;
        self
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// 注册监控器，`target` 形如 `flow:<id>` 或 `resource:<id>`
    pub async fn register_monitor(&self, id: &str, target: &str) -> ControlPlaneResult<()> {
        if id.trim().is_empty() {
            return Err(ControlPlaneError::validation("监控器ID不能为空"));
        }
        let target: PressureTarget = target.parse()?;

        let now = self.clock.now();
        let mut state = self.state.write().await;
        if state.monitors.contains_key(id) {
            return Err(ControlPlaneError::validation(format!("监控器 {id} 已存在")));
        }
        state.record(now, id, "monitor_registered", Some(target.to_string()));
        info!("注册监控器: {} -> {}", id, target);
        state.monitors.insert(id.to_string(), Monitor::new(id, target));
        Ok(())
    }

    pub async fn activate_monitor(&self, id: &str) -> ControlPlaneResult<()> {
        self.set_monitor_active(id, true).await
    }

    /// 停用后不再采样，已有样本保留
    pub async fn deactivate_monitor(&self, id: &str) -> ControlPlaneResult<()> {
        self.set_monitor_active(id, false).await
    }

    async fn set_monitor_active(&self, id: &str, active: bool) -> ControlPlaneResult<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let monitor = state
            .monitors
            .get_mut(id)
            .ok_or_else(|| ControlPlaneError::not_found("监控器", id))?;
        if monitor.active == active {
            return Ok(());
        }
        monitor.active = active;
        let event = if active {
            "monitor_activated"
        } else {
            "monitor_deactivated"
        };
        state.record(now, id, event, None);
        Ok(())
    }

    pub async fn register_threshold(&self, threshold: Threshold) -> ControlPlaneResult<()> {
        Self::validate_threshold(&threshold)?;

        let now = self.clock.now();
        let mut state = self.state.write().await;
        state.record(
            now,
            &threshold.id,
            "threshold_registered",
            Some(threshold.target.to_string()),
        );
        info!(
            "注册阈值策略: {} (目标 {}，优先级 {})",
            threshold.id, threshold.target, threshold.priority
        );
        // 同ID重新注册时替换旧策略并清空冷却记录
        let id = threshold.id.clone();
        state.cooldowns.retain(|(threshold_id, _), _| *threshold_id != id);
        state.thresholds.insert(id, threshold);
        Ok(())
    }

    fn validate_threshold(threshold: &Threshold) -> ControlPlaneResult<()> {
        if threshold.id.trim().is_empty() {
            return Err(ControlPlaneError::validation("阈值ID不能为空"));
        }
        if threshold.target.id().trim().is_empty() {
            return Err(ControlPlaneError::validation(format!(
                "阈值 {} 的目标不能为空",
                threshold.id
            )));
        }
        if threshold.limits.is_empty() {
            return Err(ControlPlaneError::validation(format!(
                "阈值 {} 至少需要一个限制条件",
                threshold.id
            )));
        }
        if threshold.actions.is_empty() {
            return Err(ControlPlaneError::validation(format!(
                "阈值 {} 至少需要一个动作",
                threshold.id
            )));
        }
        for limit in &threshold.limits {
            if !limit.value.is_finite() {
                return Err(ControlPlaneError::validation(format!(
                    "阈值 {} 的限制值无效",
                    threshold.id
                )));
            }
        }
        for action in &threshold.actions {
            match (&action.kind, &threshold.target) {
                (ActionKind::Throttle { rate }, PressureTarget::Flow(_)) => {
                    if !(0.0..=1.0).contains(rate) {
                        return Err(ControlPlaneError::validation(format!(
                            "限流比例必须在 [0, 1] 内: {rate}"
                        )));
                    }
                }
                (ActionKind::Scale { factor }, PressureTarget::Resource(_)) => {
                    if !factor.is_finite() || *factor <= 0.0 {
                        return Err(ControlPlaneError::validation(format!(
                            "扩缩容系数必须为正: {factor}"
                        )));
                    }
                }
                (ActionKind::Notify { .. }, _) => {}
                (kind, target) => {
                    return Err(ControlPlaneError::validation(format!(
                        "动作 {} 不适用于目标 {}",
                        kind.name(),
                        target
                    )));
                }
            }
        }
        Ok(())
    }

    /// 运行一个监控周期
    pub async fn monitor(&self) -> ControlPlaneResult<MonitorReport> {
        let mut report = MonitorReport::default();

        let targets: Vec<(String, PressureTarget)> = {
            let state = self.state.read().await;
            state
                .monitors
                .values()
                .filter(|monitor| monitor.active)
                .map(|monitor| (monitor.id.clone(), monitor.target.clone()))
                .collect()
        };

        let mut readings = Vec::with_capacity(targets.len());
        for (monitor_id, target) in targets {
            let reading = self.source.pressure(&target).await;
            readings.push((monitor_id, reading));
        }

        let pending = {
            let now = self.clock.now();
            let mut state = self.state.write().await;
            self.apply_readings(&mut state, readings, now, &mut report);
            self.evaluate_thresholds(&mut state, now, &mut report)
        };

        let mut outcomes = Vec::with_capacity(pending.len());
        for action in pending {
            let result = self.execute_action(&action).await;
            outcomes.push((action, result));
        }

        let now = self.clock.now();
        let mut state = self.state.write().await;
        for (action, result) in outcomes {
            let detail = format!(
                "monitor={} target={} action={} level={:.3} status={}",
                action.monitor_id,
                action.target,
                action.action.kind.name(),
                action.pressure.level,
                action.pressure.status
            );
            match result {
                Ok(()) => {
                    state.actions_executed += 1;
                    report.actions_executed += 1;
                    counter!("controlplane_governor_actions_total", "action" => action.action.kind.name())
                        .increment(1);
                    state.record(now, &action.threshold_id, "action_executed", Some(detail));
                }
                Err(e) => {
                    warn!(
                        "阈值 {} 的动作 {} 执行失败: {}",
                        action.threshold_id,
                        action.action.kind.name(),
                        e
                    );
                    state.actions_failed += 1;
                    report.actions_failed += 1;
                    state.record(
                        now,
                        &action.threshold_id,
                        "action_failed",
                        Some(format!("{detail} error={e}")),
                    );
                }
            }
        }

        let active: Vec<&Monitor> = state.monitors.values().filter(|m| m.active).collect();
        let max_level = active
            .iter()
            .map(|m| m.pressure.level)
            .fold(0.0_f64, f64::max);
        let average_level = if active.is_empty() {
            0.0
        } else {
            active.iter().map(|m| m.pressure.level).sum::<f64>() / active.len() as f64
        };
        let elevated = active
            .iter()
            .filter(|m| m.pressure.status >= PressureStatus::High)
            .count();

        let point = MetricPoint::new(COMPONENT, now)
            .with_value("monitors_active", active.len() as f64)
            .with_value("pressure_average", average_level)
            .with_value("pressure_max", max_level)
            .with_value("monitors_elevated", elevated as f64)
            .with_value("actions_executed", state.actions_executed as f64)
            .with_value("actions_failed", state.actions_failed as f64);
        state.metric_points.push(point.clone());
        drop(state);

        self.metrics_sink.record(&point);

        debug!(
            "监控周期完成: 采样 {}，触发 {}，执行动作 {}，失败 {}",
            report.sampled,
            report.triggered.len(),
            report.actions_executed,
            report.actions_failed
        );
        Ok(report)
    }

    /// 写入样本、裁剪窗口并重新计算压力
    fn apply_readings(
        &self,
        state: &mut GovernorState,
        readings: Vec<(String, ControlPlaneResult<f64>)>,
        now: DateTime<Utc>,
        report: &mut MonitorReport,
    ) {
        let cutoff = now - to_chrono(self.config.window());
        let threshold = self.config.pressure_threshold;

        for (monitor_id, reading) in readings {
            let Some(monitor) = state.monitors.get_mut(&monitor_id) else {
                continue;
            };

            let value = match reading {
                Ok(value) if value.is_finite() => value.clamp(0.0, 1.0),
                Ok(value) => {
                    let message = format!("压力值无效: {value}");
                    monitor.last_error = Some(message.clone());
                    monitor.prune(cutoff);
                    report.sample_errors.push((monitor_id.clone(), message.clone()));
                    state.record(now, &monitor_id, "sample_failed", Some(message));
                    continue;
                }
                Err(e) => {
                    warn!("监控器 {} 采样失败: {}", monitor_id, e);
                    monitor.last_error = Some(e.to_string());
                    monitor.prune(cutoff);
                    report.sample_errors.push((monitor_id.clone(), e.to_string()));
                    state.record(now, &monitor_id, "sample_failed", Some(e.to_string()));
                    continue;
                }
            };

            monitor.samples.push_back(Sample {
                timestamp: now,
                value,
            });
            monitor.prune(cutoff);
            monitor.stats = compute_stats(&monitor.samples);

            let previous = monitor.pressure.status;
            monitor.pressure = evaluate(&monitor.stats, threshold);
            monitor.last_error = None;
            monitor.updated_at = Some(now);

            match (monitor.pressure.status, monitor.non_normal_since) {
                (PressureStatus::Normal, _) => monitor.non_normal_since = None,
                (_, None) => monitor.non_normal_since = Some(now),
                _ => {}
            }
            report.sampled += 1;

            let status = monitor.pressure.status;
            if status != previous {
                let detail = format!("{previous} -> {status} level={:.3}", monitor.pressure.level);
                if status > previous {
                    warn!("监控器 {} 压力上升: {}", monitor_id, detail);
                } else {
                    info!("监控器 {} 压力回落: {}", monitor_id, detail);
                }
                state.record(now, &monitor_id, "status_changed", Some(detail));
            }
        }
    }

    /// 按优先级评估阈值，返回通过冷却检查的动作
    fn evaluate_thresholds(
        &self,
        state: &mut GovernorState,
        now: DateTime<Utc>,
        report: &mut MonitorReport,
    ) -> Vec<PendingAction> {
        let mut thresholds: Vec<Threshold> = state.thresholds.values().cloned().collect();
        thresholds.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

        let mut pending = Vec::new();
        for threshold in thresholds {
            let matching: Vec<(String, Pressure, Option<DateTime<Utc>>)> = state
                .monitors
                .values()
                .filter(|m| m.active && m.target == threshold.target && m.stats.samples > 0)
                .map(|m| (m.id.clone(), m.pressure, m.non_normal_since))
                .collect();

            for (monitor_id, pressure, non_normal_since) in matching {
                if !Self::is_triggered(&threshold, &pressure, non_normal_since, now) {
                    continue;
                }
                report.triggered.push(threshold.id.clone());
                debug!("阈值 {} 被监控器 {} 触发", threshold.id, monitor_id);

                for (index, action) in threshold.actions.iter().enumerate() {
                    let key = (threshold.id.clone(), index);
                    let cooling = state
                        .cooldowns
                        .get(&key)
                        .is_some_and(|last| now - *last < to_chrono(action.cooldown));
                    if cooling {
                        report.actions_cooling += 1;
                        continue;
                    }
                    state.cooldowns.insert(key, now);
                    pending.push(PendingAction {
                        threshold_id: threshold.id.clone(),
                        monitor_id: monitor_id.clone(),
                        target: threshold.target.clone(),
                        action: action.clone(),
                        pressure,
                    });
                }
            }
        }
        pending
    }

    fn is_triggered(
        threshold: &Threshold,
        pressure: &Pressure,
        non_normal_since: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        threshold.limits.iter().any(|limit| match limit.kind {
            LimitKind::Level => pressure.level >= limit.value,
            LimitKind::Duration => non_normal_since
                .is_some_and(|since| now - since >= to_chrono(limit.duration)),
            LimitKind::Trend => pressure.trend == Trend::Rising && pressure.level >= limit.value,
        })
    }

    async fn execute_action(&self, pending: &PendingAction) -> ControlPlaneResult<()> {
        let target_id = pending.target.id();
        match &pending.action.kind {
            ActionKind::Throttle { rate } => {
                info!("限流 {}: 吞吐量 ×{:.2}", target_id, rate);
                self.actions.throttle_flow(target_id, *rate).await
            }
            ActionKind::Scale { factor } => {
                info!("扩容 {}: 负载 ÷{:.2}", target_id, factor);
                self.actions.scale_resource(target_id, *factor).await
            }
            ActionKind::Notify { channel } => {
                let message = format!(
                    "{} 压力 {:.3} ({})",
                    pending.target, pending.pressure.level, pending.pressure.status
                );
                info!("通知 {}: {}", channel, message);
                self.actions.notify(channel, &message).await
            }
        }
    }

    pub async fn pressure(&self, monitor_id: &str) -> ControlPlaneResult<Pressure> {
        let state = self.state.read().await;
        state
            .monitors
            .get(monitor_id)
            .map(|m| m.pressure)
            .ok_or_else(|| ControlPlaneError::not_found("监控器", monitor_id))
    }

    pub async fn monitor_stats(&self, monitor_id: &str) -> ControlPlaneResult<MonitorStats> {
        let state = self.state.read().await;
        state
            .monitors
            .get(monitor_id)
            .map(|m| m.stats)
            .ok_or_else(|| ControlPlaneError::not_found("监控器", monitor_id))
    }

    pub async fn monitor_info(&self, monitor_id: &str) -> Option<Monitor> {
        self.state.read().await.monitors.get(monitor_id).cloned()
    }

    /// 成功执行的动作总数
    pub async fn action_count(&self) -> u64 {
        self.state.read().await.actions_executed
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.state.read().await.history.to_vec()
    }

    pub async fn metric_points(&self) -> Vec<MetricPoint> {
        self.state.read().await.metric_points.to_vec()
    }
}
