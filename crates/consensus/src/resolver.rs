use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::{broadcast, Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use controlplane_config::ResolverConfig;
use controlplane_core::{
    Clock, ControlPlaneError, ControlPlaneResult, HistoryEntry, MetricPoint, MetricsSink,
    NoopMetricsSink, RingBuffer, SystemClock,
};

use crate::conflict::{Conflict, ConflictStatus};
use crate::resolution::{
    ActionExecutor, FailureReason, Resolution, ResolutionFailure, ResolutionStatus,
    ResolutionStep, ResourceRecord, StepOutcome, Strategy,
};

pub const COMPONENT: &str = "resolver";

/// 冲突处理接口，协调器通过它委托解决冲突
#[async_trait]
pub trait ConflictHandler: Send + Sync {
    async fn resolve_conflict(&self, conflict: &Conflict) -> ControlPlaneResult<Resolution>;
}

struct ResolverState {
    strategies: BTreeMap<String, Strategy>,
    resources: BTreeMap<String, ResourceRecord>,
    conflicts: BTreeMap<String, Conflict>,
    /// 已结束的冲突ID，按结束顺序，超出容量时淘汰最早的
    closed: VecDeque<String>,
    closed_capacity: usize,
    resolutions: RingBuffer<Resolution>,
    failures: RingBuffer<ResolutionFailure>,
    history: RingBuffer<HistoryEntry>,
}

impl ResolverState {
    fn new(config: &ResolverConfig) -> Self {
        Self {
            strategies: BTreeMap::new(),
            resources: BTreeMap::new(),
            conflicts: BTreeMap::new(),
            closed: VecDeque::new(),
            closed_capacity: config.history_size,
            resolutions: RingBuffer::with_capacity(config.history_size),
            failures: RingBuffer::with_capacity(config.history_size),
            history: RingBuffer::with_capacity(config.history_size),
        }
    }

    fn record(&mut self, now: DateTime<Utc>, subject: &str, event: &str, detail: Option<String>) {
        let mut entry = HistoryEntry::new(now, subject, event);
        entry.detail = detail;
        self.history.push(entry);
    }

    fn close(&mut self, conflict_id: &str) {
        if self.closed.iter().any(|id| id == conflict_id) {
            return;
        }
        self.closed.push_back(conflict_id.to_string());
        while self.closed.len() > self.closed_capacity {
            if let Some(evicted) = self.closed.pop_front() {
                self.conflicts.remove(&evicted);
            }
        }
    }

    /// 所有条件都成立的策略中优先级最高者，同优先级取ID最小
    fn select_strategy(&self, conflict: &Conflict) -> Option<Strategy> {
        let mut selected: Option<&Strategy> = None;
        for strategy in self.strategies.values() {
            if !strategy.is_applicable(conflict, &self.resources) {
                continue;
            }
            if selected.map_or(true, |current| strategy.priority > current.priority) {
                selected = Some(strategy);
            }
        }
        selected.cloned()
    }
}

/// 冲突解决器
///
/// 按条件选择策略并逐步执行其动作。开启自动解决时，登记的冲突会在
/// 有界的后台工作池中重试解决，关闭信号到达后停止。
#[derive(Clone)]
pub struct ConflictResolver {
    config: Arc<ResolverConfig>,
    state: Arc<RwLock<ResolverState>>,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn ActionExecutor>,
    metrics_sink: Arc<dyn MetricsSink>,
    workers: Arc<Semaphore>,
    tasks: Arc<Mutex<JoinSet<()>>>,
    shutdown_tx: broadcast::Sender<()>,
    is_shutdown: Arc<AtomicBool>,
}

impl ConflictResolver {
    pub fn new(
        config: ResolverConfig,
        clock: Arc<dyn Clock>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        let state = ResolverState::new(&config);
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            workers: Arc::new(Semaphore::new(config.worker_pool_size.max(1))),
            config: Arc::new(config),
            state: Arc::new(RwLock::new(state)),
            clock,
            executor,
            metrics_sink: Arc::new(NoopMetricsSink),
            tasks: Arc::new(Mutex::new(JoinSet::new())),
            shutdown_tx,
            is_shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_system_clock(config: ResolverConfig, executor: Arc<dyn ActionExecutor>) -> Self {
        Self::new(config, Arc::new(SystemClock), executor)
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = sink;
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub async fn register_strategy(&self, strategy: Strategy) -> ControlPlaneResult<()> {
        if strategy.id.trim().is_empty() {
            return Err(ControlPlaneError::validation("策略ID不能为空"));
        }
        if strategy.actions.is_empty() {
            return Err(ControlPlaneError::validation(format!(
                "策略 {} 至少需要一个动作",
                strategy.id
            )));
        }

        let now = self.clock.now();
        let mut state = self.state.write().await;
        state.record(
            now,
            &strategy.id,
            "strategy_registered",
            Some(format!("priority={}", strategy.priority)),
        );
        info!("注册解决策略: {} (优先级 {})", strategy.id, strategy.priority);
        state.strategies.insert(strategy.id.clone(), strategy);
        Ok(())
    }

    pub async fn register_resource(&self, resource: ResourceRecord) -> ControlPlaneResult<()> {
        if resource.id.trim().is_empty() {
            return Err(ControlPlaneError::validation("资源ID不能为空"));
        }
        if !(0.0..=1.0).contains(&resource.availability) {
            return Err(ControlPlaneError::validation(format!(
                "资源 {} 的可用度必须在 [0, 1] 内",
                resource.id
            )));
        }
        let mut state = self.state.write().await;
        state.resources.insert(resource.id.clone(), resource);
        Ok(())
    }

    /// 登记冲突，开启自动解决时在后台发起解决
    pub async fn register_conflict(&self, mut conflict: Conflict) -> ControlPlaneResult<()> {
        conflict.validate()?;
        conflict.status = ConflictStatus::Pending;

        let now = self.clock.now();
        {
            let mut state = self.state.write().await;
            if state.conflicts.contains_key(&conflict.id) {
                return Err(ControlPlaneError::validation(format!(
                    "冲突 {} 已存在",
                    conflict.id
                )));
            }
            state.record(now, &conflict.id, "conflict_registered", None);
            state.conflicts.insert(conflict.id.clone(), conflict.clone());
        }
        info!("登记冲突: {} ({} 个参与方)", conflict.id, conflict.parties.len());

        if self.config.auto_resolve {
            self.spawn_resolution(conflict.id).await;
        }
        Ok(())
    }

    /// 选择策略并执行，动作失败时中止后续步骤并返回该错误
    pub async fn resolve_conflict(&self, conflict: &Conflict) -> ControlPlaneResult<Resolution> {
        conflict.validate()?;

        let mut resolution = Resolution::initiated(conflict, self.clock.now());
        let strategy = self.state.read().await.select_strategy(conflict);

        let Some(strategy) = strategy else {
            let error = ControlPlaneError::not_found("适用策略", &conflict.id);
            resolution.error = Some(error.to_string());
            resolution.finish(ResolutionStatus::Failed, self.clock.now());
            self.store_resolution(resolution, None).await;
            return Err(error);
        };

        debug!("冲突 {} 选择策略 {}", conflict.id, strategy.id);
        resolution.strategy_id = Some(strategy.id.clone());
        resolution.status = ResolutionStatus::InProgress;
        resolution.steps = strategy
            .actions
            .iter()
            .enumerate()
            .map(|(index, action)| ResolutionStep {
                index,
                action: action.clone(),
                outcome: StepOutcome::NotRun,
                error: None,
            })
            .collect();

        let mut failure = None;
        for step in resolution.steps.iter_mut() {
            match self.executor.execute(conflict, &step.action).await {
                Ok(outcome) => step.outcome = outcome,
                Err(e) => {
                    warn!(
                        "冲突 {} 的步骤 {} ({}) 执行失败: {}",
                        conflict.id, step.index, step.action.name, e
                    );
                    step.outcome = StepOutcome::Failed;
                    step.error = Some(e.to_string());
                    failure = Some(e);
                    break;
                }
            }
        }

        let status = if failure.is_some() {
            ResolutionStatus::Failed
        } else {
            ResolutionStatus::Completed
        };
        resolution.error = failure.as_ref().map(ToString::to_string);
        resolution.finish(status, self.clock.now());
        self.store_resolution(resolution.clone(), Some(&strategy.id))
            .await;

        match failure {
            Some(e) => Err(e),
            None => Ok(resolution),
        }
    }

    async fn store_resolution(&self, resolution: Resolution, strategy_id: Option<&str>) {
        let now = self.clock.now();
        let success = resolution.status == ResolutionStatus::Completed;
        let confidence = resolution.result.confidence;

        let mut state = self.state.write().await;
        if let Some(strategy) = strategy_id.and_then(|id| state.strategies.get_mut(id)) {
            strategy.record_run(success);
        }
        state.record(
            now,
            &resolution.conflict_id,
            if success {
                "resolution_completed"
            } else {
                "resolution_failed"
            },
            Some(format!(
                "strategy={} confidence={:.2}",
                strategy_id.unwrap_or("-"),
                confidence
            )),
        );
        state.resolutions.push(resolution);

        let point = MetricPoint::new(COMPONENT, now)
            .with_value("confidence", confidence)
            .with_value("resolutions", state.resolutions.len() as f64)
            .with_value("failures", state.failures.len() as f64);
        drop(state);
        self.metrics_sink.record(&point);
    }

    /// 在任务集锁内检查关闭标志并订阅关闭信号，已关闭时不再派生
    async fn spawn_resolution(&self, conflict_id: String) -> bool {
        let mut tasks = self.tasks.lock().await;
        if self.is_shutdown.load(Ordering::SeqCst) {
            debug!("冲突解决器已关闭，冲突 {} 保持待处理", conflict_id);
            return false;
        }
        while tasks.try_join_next().is_some() {}

        let resolver = self.clone();
        let workers = Arc::clone(&self.workers);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tasks.spawn(async move {
            let permit = tokio::select! {
                permit = workers.acquire_owned() => permit,
                _ = shutdown_rx.recv() => return,
            };
            let Ok(_permit) = permit else {
                return;
            };

            let attempts = AtomicU32::new(0);
            let timeout = resolver.config.resolution_timeout();
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("冲突 {} 的后台解决因关闭而取消", conflict_id);
                    resolver.release_conflict(&conflict_id).await;
                }
                outcome = tokio::time::timeout(timeout, resolver.attempt_resolution(&conflict_id, &attempts)) => {
                    let attempts = attempts.load(Ordering::SeqCst);
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err((reason, last_error))) => {
                            resolver.record_failure(&conflict_id, reason, attempts, last_error).await;
                        }
                        Err(_) => {
                            let message = format!("超过 {:?} 未完成", timeout);
                            resolver
                                .record_failure(&conflict_id, FailureReason::Timeout, attempts, Some(message))
                                .await;
                        }
                    }
                }
            }
        });
        true
    }

    /// 后台重试，第 n 次失败后等待 n × backoff_base
    async fn attempt_resolution(
        &self,
        conflict_id: &str,
        attempts: &AtomicU32,
    ) -> Result<(), (FailureReason, Option<String>)> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last = (FailureReason::MaxAttempts, None);

        for attempt in 1..=max_attempts {
            attempts.store(attempt, Ordering::SeqCst);

            let conflict = {
                let mut state = self.state.write().await;
                let Some(conflict) = state.conflicts.get_mut(conflict_id) else {
                    return Err((FailureReason::MaxAttempts, Some("冲突已移除".to_string())));
                };
                if !conflict.status.is_open() {
                    return Ok(());
                }
                conflict.status = ConflictStatus::Resolving;
                conflict.clone()
            };

            match self.resolve_conflict(&conflict).await {
                Ok(resolution) if resolution.result.confidence >= self.config.min_confidence => {
                    let now = self.clock.now();
                    let mut state = self.state.write().await;
                    if let Some(conflict) = state.conflicts.get_mut(conflict_id) {
                        conflict.status = ConflictStatus::AutoResolved;
                    }
                    state.close(conflict_id);
                    state.record(
                        now,
                        conflict_id,
                        "auto_resolved",
                        Some(format!("attempt={attempt}")),
                    );
                    info!("冲突 {} 第 {} 次尝试自动解决成功", conflict_id, attempt);
                    return Ok(());
                }
                Ok(resolution) => {
                    debug!(
                        "冲突 {} 第 {} 次尝试置信度不足: {:.2}",
                        conflict_id, attempt, resolution.result.confidence
                    );
                    last = (
                        FailureReason::LowConfidence,
                        Some(format!(
                            "置信度 {:.2} 低于 {:.2}",
                            resolution.result.confidence, self.config.min_confidence
                        )),
                    );
                }
                Err(e) => {
                    debug!("冲突 {} 第 {} 次尝试失败: {}", conflict_id, attempt, e);
                    last = (FailureReason::MaxAttempts, Some(e.to_string()));
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.config.backoff_base() * attempt).await;
            }
        }
        Err(last)
    }

    async fn record_failure(
        &self,
        conflict_id: &str,
        reason: FailureReason,
        attempts: u32,
        last_error: Option<String>,
    ) {
        warn!(
            "冲突 {} 自动解决失败: {} (尝试 {} 次，最后错误: {})",
            conflict_id,
            reason,
            attempts,
            last_error.as_deref().unwrap_or("-")
        );
        counter!("controlplane_resolver_failures_total", "reason" => reason.to_string())
            .increment(1);

        let now = self.clock.now();
        let mut state = self.state.write().await;
        if let Some(conflict) = state.conflicts.get_mut(conflict_id) {
            conflict.status = ConflictStatus::Failed;
        }
        state.close(conflict_id);
        state.record(now, conflict_id, "auto_resolve_failed", Some(reason.to_string()));
        state.failures.push(ResolutionFailure {
            conflict_id: conflict_id.to_string(),
            reason,
            attempts,
            last_error,
            timestamp: now,
        });
    }

    /// 取消时把冲突放回待处理状态
    async fn release_conflict(&self, conflict_id: &str) {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        if let Some(conflict) = state.conflicts.get_mut(conflict_id) {
            if conflict.status == ConflictStatus::Resolving {
                conflict.status = ConflictStatus::Pending;
            }
        }
        state.record(now, conflict_id, "auto_resolve_cancelled", None);
    }

    /// 通知后台任务停止并等待其退出
    pub async fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            debug!("冲突解决器已经关闭");
            return;
        }
        info!("关闭冲突解决器");

        let mut tasks = self.tasks.lock().await;
        let _ = self.shutdown_tx.send(());
        while tasks.join_next().await.is_some() {}
        info!("冲突解决器后台任务已全部退出");
    }

    pub async fn conflict(&self, conflict_id: &str) -> Option<Conflict> {
        self.state.read().await.conflicts.get(conflict_id).cloned()
    }

    pub async fn strategy(&self, strategy_id: &str) -> Option<Strategy> {
        self.state.read().await.strategies.get(strategy_id).cloned()
    }

    pub async fn resolutions(&self) -> Vec<Resolution> {
        self.state.read().await.resolutions.to_vec()
    }

    pub async fn failures(&self) -> Vec<ResolutionFailure> {
        self.state.read().await.failures.to_vec()
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.state.read().await.history.to_vec()
    }
}

#[async_trait]
impl ConflictHandler for ConflictResolver {
    async fn resolve_conflict(&self, conflict: &Conflict) -> ControlPlaneResult<Resolution> {
        ConflictResolver::resolve_conflict(self, conflict).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{ConflictType, Party};
    use crate::resolution::{Condition, Operator, StrategyAction};
    use controlplane_core::{ErrorKind, ManualClock};
    use std::time::Duration;

    /// 名为 fail 的动作返回错误，名为 skip 的动作跳过
    struct ScriptedExecutor;

    #[async_trait]
    impl ActionExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            _conflict: &Conflict,
            action: &StrategyAction,
        ) -> ControlPlaneResult<StepOutcome> {
            match action.name.as_str() {
                "fail" => Err(ControlPlaneError::internal("action failed")),
                "skip" => Ok(StepOutcome::Skipped),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(StepOutcome::Completed)
                }
                _ => Ok(StepOutcome::Completed),
            }
        }
    }

    fn config() -> ResolverConfig {
        ResolverConfig {
            auto_resolve: false,
            backoff_base_ms: 1,
            ..Default::default()
        }
    }

    fn resolver(config: ResolverConfig) -> ConflictResolver {
        ConflictResolver::new(
            config,
            Arc::new(ManualClock::default()),
            Arc::new(ScriptedExecutor),
        )
    }

    fn conflict(id: &str) -> Conflict {
        Conflict::new(id, ConflictType::Resource)
            .with_resource("disk-1")
            .with_party(Party::new("a", "owner", "service"))
            .with_party(Party::new("b", "tenant", "batch"))
    }

    fn strategy(id: &str, priority: i32, actions: &[&str]) -> Strategy {
        actions.iter().fold(
            Strategy::new(id, id).with_priority(priority),
            |strategy, name| strategy.with_action(StrategyAction::new(*name, "step")),
        )
    }

    async fn wait_for_status(resolver: &ConflictResolver, id: &str, status: ConflictStatus) {
        for _ in 0..500 {
            if resolver.conflict(id).await.map(|c| c.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("conflict {id} never reached {status:?}");
    }

    #[tokio::test]
    async fn test_register_strategy_validation() {
        let resolver = resolver(config());
        let err = resolver
            .register_strategy(Strategy::new("", "x").with_action(StrategyAction::new("a", "b")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = resolver
            .register_strategy(Strategy::new("s", "x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_selects_highest_priority_applicable_strategy() {
        let resolver = resolver(config());
        resolver
            .register_resource(ResourceRecord::new("disk-1", "available", 0.9))
            .await
            .unwrap();
        resolver
            .register_strategy(strategy("low", 1, &["a"]))
            .await
            .unwrap();
        resolver
            .register_strategy(
                strategy("high", 10, &["a", "b"]).with_condition(Condition::ResourceAvailability {
                    operator: Operator::Ge,
                    value: 0.5,
                }),
            )
            .await
            .unwrap();
        resolver
            .register_strategy(
                strategy("inapplicable", 100, &["a"]).with_condition(Condition::PartyRole {
                    operator: Operator::Eq,
                    value: "auditor".into(),
                }),
            )
            .await
            .unwrap();

        let resolution = resolver.resolve_conflict(&conflict("c1")).await.unwrap();
        assert_eq!(resolution.strategy_id.as_deref(), Some("high"));
        assert_eq!(resolution.status, ResolutionStatus::Completed);
        assert_eq!(resolution.steps.len(), 2);
        assert_eq!(resolution.result.confidence, 1.0);
        assert_eq!(resolution.result.impact["completion"], 1.0);

        let high = resolver.strategy("high").await.unwrap();
        assert_eq!(high.runs, 1);
        assert_eq!(high.success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_no_applicable_strategy_is_not_found() {
        let resolver = resolver(config());
        let err = resolver.resolve_conflict(&conflict("c1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = resolver
            .resolve_conflict(&Conflict::new("c2", ConflictType::State))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_failed_step_aborts_and_keeps_partial_confidence() {
        let resolver = resolver(config());
        resolver
            .register_strategy(strategy("s", 1, &["a", "b", "c", "fail"]))
            .await
            .unwrap();

        let err = resolver.resolve_conflict(&conflict("c1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);

        let resolution = resolver.resolutions().await.pop().unwrap();
        assert_eq!(resolution.status, ResolutionStatus::Failed);
        assert!((resolution.result.confidence - 0.75).abs() < 1e-9);
        assert_eq!(resolution.steps[3].outcome, StepOutcome::Failed);

        let strategy = resolver.strategy("s").await.unwrap();
        assert_eq!(strategy.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_failed_step_skips_remaining() {
        let resolver = resolver(config());
        resolver
            .register_strategy(strategy("s", 1, &["a", "fail", "b", "c"]))
            .await
            .unwrap();
        assert!(resolver.resolve_conflict(&conflict("c1")).await.is_err());

        let resolution = resolver.resolutions().await.pop().unwrap();
        assert!((resolution.result.confidence - 0.25).abs() < 1e-9);
        assert_eq!(resolution.steps[2].outcome, StepOutcome::NotRun);
    }

    #[tokio::test]
    async fn test_background_auto_resolve() {
        let resolver = resolver(ResolverConfig {
            auto_resolve: true,
            ..config()
        });
        resolver
            .register_strategy(strategy("s", 1, &["a"]))
            .await
            .unwrap();
        resolver.register_conflict(conflict("c1")).await.unwrap();

        wait_for_status(&resolver, "c1", ConflictStatus::AutoResolved).await;
        assert!(resolver.failures().await.is_empty());

        let err = resolver.register_conflict(conflict("c1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        resolver.shutdown().await;
    }

    #[tokio::test]
    async fn test_background_max_attempts() {
        let resolver = resolver(ResolverConfig {
            auto_resolve: true,
            ..config()
        });
        resolver
            .register_strategy(strategy("s", 1, &["fail"]))
            .await
            .unwrap();
        resolver.register_conflict(conflict("c1")).await.unwrap();

        wait_for_status(&resolver, "c1", ConflictStatus::Failed).await;
        let failures = resolver.failures().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].reason, FailureReason::MaxAttempts);
        assert_eq!(failures[0].attempts, 3);
        assert_eq!(resolver.resolutions().await.len(), 3);
        resolver.shutdown().await;
    }

    #[tokio::test]
    async fn test_background_low_confidence() {
        let resolver = resolver(ResolverConfig {
            auto_resolve: true,
            max_attempts: 2,
            ..config()
        });
        resolver
            .register_strategy(strategy("s", 1, &["a", "skip"]))
            .await
            .unwrap();
        resolver.register_conflict(conflict("c1")).await.unwrap();

        wait_for_status(&resolver, "c1", ConflictStatus::Failed).await;
        let failures = resolver.failures().await;
        assert_eq!(failures[0].reason, FailureReason::LowConfidence);
        assert_eq!(failures[0].attempts, 2);
        resolver.shutdown().await;
    }

    #[tokio::test]
    async fn test_background_timeout() {
        let resolver = resolver(ResolverConfig {
            auto_resolve: true,
            resolution_timeout_seconds: 1,
            ..config()
        });
        resolver
            .register_strategy(strategy("s", 1, &["slow"]))
            .await
            .unwrap();
        resolver.register_conflict(conflict("c1")).await.unwrap();

        wait_for_status(&resolver, "c1", ConflictStatus::Failed).await;
        let failures = resolver.failures().await;
        assert_eq!(failures[0].reason, FailureReason::Timeout);
        assert_eq!(failures[0].attempts, 1);
        resolver.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_background_attempts() {
        let resolver = resolver(ResolverConfig {
            auto_resolve: true,
            ..config()
        });
        resolver
            .register_strategy(strategy("s", 1, &["slow"]))
            .await
            .unwrap();
        resolver.register_conflict(conflict("c1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        resolver.shutdown().await;
        let first = resolver.conflict("c1").await.unwrap();
        assert_eq!(first.status, ConflictStatus::Pending);
        assert!(resolver.failures().await.is_empty());

        // 关闭后登记的冲突不再自动解决
        resolver.register_conflict(conflict("c2")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            resolver.conflict("c2").await.unwrap().status,
            ConflictStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_no_attempt_spawned_after_shutdown() {
        let resolver = resolver(ResolverConfig {
            auto_resolve: true,
            ..config()
        });
        resolver
            .register_strategy(strategy("s", 1, &["a"]))
            .await
            .unwrap();
        resolver.shutdown().await;

        // 登记已通过关闭检查、派生晚于关闭信号
        resolver
            .state
            .write()
            .await
            .conflicts
            .insert("late".to_string(), conflict("late"));
        assert!(!resolver.spawn_resolution("late".to_string()).await);
        assert!(resolver.tasks.lock().await.is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            resolver.conflict("late").await.unwrap().status,
            ConflictStatus::Pending
        );
        assert!(resolver.resolutions().await.is_empty());
    }

    #[tokio::test]
    async fn test_closed_conflicts_are_bounded() {
        let resolver = resolver(ResolverConfig {
            auto_resolve: true,
            history_size: 2,
            ..config()
        });
        resolver
            .register_strategy(strategy("s", 1, &["a"]))
            .await
            .unwrap();

        for i in 0..5 {
            let id = format!("c{i}");
            resolver.register_conflict(conflict(&id)).await.unwrap();
            wait_for_status(&resolver, &id, ConflictStatus::AutoResolved).await;
        }

        let retained = resolver.state.read().await.conflicts.len();
        assert_eq!(retained, 2);
        assert!(resolver.conflict("c0").await.is_none());
        assert!(resolver.conflict("c4").await.is_some());

        // 已淘汰的ID可以重新登记
        resolver.register_conflict(conflict("c0")).await.unwrap();
        wait_for_status(&resolver, "c0", ConflictStatus::AutoResolved).await;
        assert!(resolver.conflict("c3").await.is_none());
        assert!(resolver.conflict("c4").await.is_some());
        resolver.shutdown().await;
    }
}
