use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use controlplane_config::ConsensusConfig;
use controlplane_core::{
    to_chrono, Clock, ControlPlaneError, ControlPlaneResult, HistoryEntry, MetricPoint,
    MetricsSink, NoopMetricsSink, RingBuffer, SystemClock,
};

use crate::conflict::{Conflict, ConflictStatus};
use crate::models::{
    Agreement, AgreementState, CoordinateReport, CoordinatorMetrics, Decision, GovernanceRecord,
    Process, ProcessSpec, ProcessState, Session, SessionPhase, Signature, Term,
};
use crate::resolver::ConflictHandler;

pub const COMPONENT: &str = "coordinator";

#[derive(Default)]
struct Counters {
    sessions_created: u64,
    sessions_completed: u64,
    sessions_expired: u64,
    consensus_failures: u64,
    conflicts_raised: u64,
    conflicts_resolved: u64,
    agreements_completed: u64,
    agreements_abandoned: u64,
}

struct CoordinatorState {
    processes: BTreeMap<String, Process>,
    sessions: BTreeMap<String, Session>,
    finished_sessions: RingBuffer<Session>,
    agreements: RingBuffer<Agreement>,
    governance: RingBuffer<GovernanceRecord>,
    counters: Counters,
    history: RingBuffer<HistoryEntry>,
    metric_points: RingBuffer<MetricPoint>,
}

impl CoordinatorState {
    fn new(config: &ConsensusConfig) -> Self {
        Self {
            processes: BTreeMap::new(),
            sessions: BTreeMap::new(),
            finished_sessions: RingBuffer::with_capacity(config.history_size),
            agreements: RingBuffer::with_capacity(config.history_size),
            governance: RingBuffer::with_capacity(config.history_size),
            counters: Counters::default(),
            history: RingBuffer::with_capacity(config.history_size),
            metric_points: RingBuffer::with_capacity(config.history_size),
        }
    }

    fn record(&mut self, now: DateTime<Utc>, subject: &str, event: &str, detail: Option<String>) {
        let mut entry = HistoryEntry::new(now, subject, event);
        entry.detail = detail;
        self.history.push(entry);
    }

    fn live_session_mut(&mut self, session_id: &str) -> ControlPlaneResult<&mut Session> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| ControlPlaneError::not_found("会话", session_id))?;
        if session.phase.is_final() {
            return Err(ControlPlaneError::validation(format!(
                "会话 {session_id} 已结束"
            )));
        }
        Ok(session)
    }

    fn metrics(&self) -> CoordinatorMetrics {
        let counters = &self.counters;
        let finished = counters.sessions_completed + counters.sessions_expired;
        CoordinatorMetrics {
            success_rate: if finished == 0 {
                0.0
            } else {
                counters.sessions_completed as f64 / finished as f64
            },
            conflict_rate: if counters.sessions_created == 0 {
                0.0
            } else {
                counters.conflicts_raised as f64 / counters.sessions_created as f64
            },
            consensus_failures: counters.consensus_failures,
            active_sessions: self.sessions.len(),
            sessions_created: counters.sessions_created,
            sessions_completed: counters.sessions_completed,
            sessions_expired: counters.sessions_expired,
            agreements_completed: counters.agreements_completed,
            agreements_abandoned: counters.agreements_abandoned,
        }
    }

    fn finalize(&mut self, session_id: &str, phase: SessionPhase, now: DateTime<Utc>) {
        if let Some(mut session) = self.sessions.remove(session_id) {
            session.phase = phase;
            session.finished_at = Some(now);
            self.finished_sessions.push(session);
        }
    }
}

/// 共识协调器
///
/// 管理参与进程与共识会话：收集投票、在法定人数一致时形成协议，
/// 并把会话中的冲突委托给冲突解决器。
#[derive(Clone)]
pub struct ConsensusCoordinator {
    config: Arc<ConsensusConfig>,
    state: Arc<RwLock<CoordinatorState>>,
    clock: Arc<dyn Clock>,
    resolver: Arc<dyn ConflictHandler>,
    metrics_sink: Arc<dyn MetricsSink>,
}

impl ConsensusCoordinator {
    pub fn new(
        config: ConsensusConfig,
        clock: Arc<dyn Clock>,
        resolver: Arc<dyn ConflictHandler>,
    ) -> Self {
        let state = CoordinatorState::new(&config);
        Self {
            config: Arc::new(config),
            state: Arc::new(RwLock::new(state)),
            clock,
            resolver,
            metrics_sink: Arc::new(NoopMetricsSink),
        }
    }

    pub fn with_system_clock(config: ConsensusConfig, resolver: Arc<dyn ConflictHandler>) -> Self {
        Self::new(config, Arc::new(SystemClock), resolver)
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = sink;
        self
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub async fn register_process(&self, spec: ProcessSpec) -> ControlPlaneResult<()> {
        if spec.id.trim().is_empty() {
            return Err(ControlPlaneError::validation("进程ID不能为空"));
        }
        if spec.process_type.trim().is_empty() {
            return Err(ControlPlaneError::validation(format!(
                "进程 {} 的类型不能为空",
                spec.id
            )));
        }

        let now = self.clock.now();
        let mut state = self.state.write().await;
        if state.processes.contains_key(&spec.id) {
            return Err(ControlPlaneError::validation(format!(
                "进程 {} 已存在",
                spec.id
            )));
        }
        let id = spec.id.clone();
        state
            .processes
            .insert(id.clone(), Process::new(spec, now));
        state.record(now, &id, "process_registered", None);
        info!("注册进程: {}", id);
        Ok(())
    }

    pub async fn heartbeat(&self, process_id: &str) -> ControlPlaneResult<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let process = state
            .processes
            .get_mut(process_id)
            .ok_or_else(|| ControlPlaneError::not_found("进程", process_id))?;
        process.last_update = now;
        Ok(())
    }

    /// 创建会话并返回会话ID
    pub async fn create_session(
        &self,
        participants: Vec<String>,
        session_type: &str,
    ) -> ControlPlaneResult<String> {
        let quorum = self.config.quorum_size;
        if participants.len() < quorum {
            return Err(ControlPlaneError::validation(format!(
                "参与者数量 {} 少于法定人数 {}",
                participants.len(),
                quorum
            )));
        }
        if participants.is_empty() {
            return Err(ControlPlaneError::validation("参与者列表不能为空"));
        }
        if participants.len() > self.config.max_participants {
            return Err(ControlPlaneError::validation(format!(
                "参与者数量 {} 超过上限 {}",
                participants.len(),
                self.config.max_participants
            )));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = participants.iter().find(|p| !seen.insert(p.as_str())) {
            return Err(ControlPlaneError::validation(format!(
                "参与者重复: {duplicate}"
            )));
        }

        let now = self.clock.now();
        let mut state = self.state.write().await;
        for participant in &participants {
            let process = state
                .processes
                .get(participant)
                .ok_or_else(|| ControlPlaneError::not_found("进程", participant))?;
            if process.state != ProcessState::Active {
                return Err(ControlPlaneError::validation(format!(
                    "进程 {participant} 当前不可参与会话"
                )));
            }
        }

        let session = Session {
            id: Uuid::new_v4().to_string(),
            session_type: session_type.to_string(),
            participants,
            phase: SessionPhase::Initialized,
            deadline: now + to_chrono(self.config.consensus_timeout()),
            decisions: Vec::new(),
            conflicts: Vec::new(),
            progress: 0.0,
            created_at: now,
            finished_at: None,
        };
        let id = session.id.clone();
        state.record(
            now,
            &id,
            "session_created",
            Some(format!("participants={}", session.participants.len())),
        );
        state.sessions.insert(id.clone(), session);
        state.counters.sessions_created += 1;

        info!("创建会话: {} ({})", id, session_type);
        Ok(id)
    }

    /// 在会话中发起决议并返回决议ID
    pub async fn propose_decision(
        &self,
        session_id: &str,
        topic: &str,
        value: &str,
    ) -> ControlPlaneResult<String> {
        if topic.trim().is_empty() {
            return Err(ControlPlaneError::validation("决议主题不能为空"));
        }
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let session = state.live_session_mut(session_id)?;
        let decision = Decision::new(topic, value, now);
        let id = decision.id.clone();
        session.decisions.push(decision);
        state.record(now, session_id, "decision_proposed", Some(topic.to_string()));
        Ok(id)
    }

    pub async fn cast_vote(
        &self,
        session_id: &str,
        decision_id: &str,
        participant: &str,
        vote: bool,
    ) -> ControlPlaneResult<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let session = state.live_session_mut(session_id)?;
        if !session.is_participant(participant) {
            return Err(ControlPlaneError::validation(format!(
                "{participant} 不是会话 {session_id} 的参与者"
            )));
        }
        let decision = session
            .decisions
            .iter_mut()
            .find(|d| d.id == decision_id)
            .ok_or_else(|| ControlPlaneError::not_found("决议", decision_id))?;
        decision.votes.insert(participant.to_string(), vote);

        debug!("会话 {} 决议 {} 收到 {} 的投票: {}", session_id, decision_id, participant, vote);
        state.record(
            now,
            session_id,
            "vote_cast",
            Some(format!("decision={decision_id} participant={participant} vote={vote}")),
        );
        Ok(())
    }

    /// 为会话附加冲突，会话进入 resolving
    pub async fn raise_conflict(
        &self,
        session_id: &str,
        mut conflict: Conflict,
    ) -> ControlPlaneResult<()> {
        conflict.validate()?;
        conflict.status = ConflictStatus::Pending;
        conflict.session_id = Some(session_id.to_string());

        let now = self.clock.now();
        let mut state = self.state.write().await;
        let session = state.live_session_mut(session_id)?;
        if session.conflicts.iter().any(|c| c.id == conflict.id) {
            return Err(ControlPlaneError::validation(format!(
                "冲突 {} 已存在于会话 {}",
                conflict.id, session_id
            )));
        }
        let conflict_id = conflict.id.clone();
        session.conflicts.push(conflict);
        session.phase = SessionPhase::Resolving;
        state.counters.conflicts_raised += 1;
        state.record(now, session_id, "conflict_raised", Some(conflict_id.clone()));

        warn!("会话 {} 出现冲突 {}", session_id, conflict_id);
        Ok(())
    }

    /// 运行一个协调周期
    pub async fn coordinate(&self) -> ControlPlaneResult<CoordinateReport> {
        let mut report = CoordinateReport::default();

        {
            let now = self.clock.now();
            let mut state = self.state.write().await;
            self.check_processes(&mut state, now, &mut report);
            self.manage_sessions(&mut state, now, &mut report);
            self.build_agreements(&mut state, now, &mut report);
        }

        self.resolve_conflicts(&mut report).await;

        let now = self.clock.now();
        let mut state = self.state.write().await;
        let metrics = state.metrics();
        let point = MetricPoint::new(COMPONENT, now)
            .with_value("success_rate", metrics.success_rate)
            .with_value("conflict_rate", metrics.conflict_rate)
            .with_value("consensus_failures", metrics.consensus_failures as f64)
            .with_value("active_sessions", metrics.active_sessions as f64)
            .with_value("processes", state.processes.len() as f64);
        state.metric_points.push(point.clone());
        drop(state);

        self.metrics_sink.record(&point);

        debug!(
            "协调周期完成: 协议 {}，过期会话 {}，共识失败 {}，冲突解决 {}/{}",
            report.agreements.len(),
            report.sessions_expired.len(),
            report.consensus_errors.len(),
            report.conflicts_resolved,
            report.conflicts_resolved + report.conflicts_failed
        );
        Ok(report)
    }

    /// 移除心跳超时的进程，检查依赖
    fn check_processes(
        &self,
        state: &mut CoordinatorState,
        now: DateTime<Utc>,
        report: &mut CoordinateReport,
    ) {
        let timeout = to_chrono(self.config.consensus_timeout());
        let stale: Vec<String> = state
            .processes
            .values()
            .filter(|p| now - p.last_update > timeout)
            .map(|p| p.id.clone())
            .collect();
        for process_id in stale {
            state.processes.remove(&process_id);
            warn!("进程 {} 心跳超时，已移除", process_id);
            state.record(now, &process_id, "process_dropped", None);
            report.processes_dropped.push(process_id);
        }

        let mut changes = Vec::new();
        for process in state.processes.values() {
            let missing: Vec<&str> = process
                .dependencies
                .iter()
                .filter(|dep| !state.processes.contains_key(*dep))
                .map(String::as_str)
                .collect();
            if missing.is_empty() {
                if process.state == ProcessState::Blocked {
                    changes.push((process.id.clone(), None));
                }
            } else {
                let error = ControlPlaneError::dependency(format!(
                    "进程 {} 依赖的 {} 不存在",
                    process.id,
                    missing.join(", ")
                ));
                changes.push((process.id.clone(), Some(error)));
            }
        }

        for (process_id, error) in changes {
            let Some(process) = state.processes.get_mut(&process_id) else {
                continue;
            };
            match error {
                Some(error) => {
                    let newly_blocked = process.state != ProcessState::Blocked;
                    process.state = ProcessState::Blocked;
                    if newly_blocked {
                        warn!("{}", error);
                        state.record(now, &process_id, "process_blocked", Some(error.to_string()));
                    }
                    report.dependency_errors.push((process_id, error.to_string()));
                }
                None => {
                    process.state = ProcessState::Active;
                    info!("进程 {} 依赖已满足，恢复活跃", process_id);
                    state.record(now, &process_id, "process_unblocked", None);
                }
            }
        }
    }

    /// 处理过期会话，刷新进度并推进阶段
    fn manage_sessions(
        &self,
        state: &mut CoordinatorState,
        now: DateTime<Utc>,
        report: &mut CoordinateReport,
    ) {
        let quorum = self.config.quorum_size;
        let min_votes = self.config.decision_min_votes;

        let expired: Vec<String> = state
            .sessions
            .values()
            .filter(|s| now > s.deadline)
            .map(|s| s.id.clone())
            .collect();
        for session_id in expired {
            let Some(session) = state.sessions.get_mut(&session_id) else {
                continue;
            };
            let insufficient = session
                .decisions
                .iter()
                .filter(|d| d.vote_count() < quorum)
                .count() as u64;
            let mut timed_out = Vec::new();
            for conflict in session.conflicts.iter_mut().filter(|c| c.status.is_open()) {
                conflict.status = ConflictStatus::Resolved;
                timed_out.push(conflict.id.clone());
            }

            state.counters.consensus_failures += insufficient;
            state.counters.sessions_expired += 1;
            for conflict_id in timed_out {
                state.governance.push(GovernanceRecord {
                    timestamp: now,
                    session_id: session_id.clone(),
                    conflict_id,
                    code: "TIMEOUT".to_string(),
                    message: "会话过期，冲突按超时处理".to_string(),
                });
            }
            state.finalize(&session_id, SessionPhase::Expired, now);
            state.record(
                now,
                &session_id,
                "session_expired",
                Some(format!("insufficient_decisions={insufficient}")),
            );
            warn!("会话 {} 已过期 (票数不足的决议 {})", session_id, insufficient);
            report.sessions_expired.push(session_id);
        }

        for session in state.sessions.values_mut() {
            let total = session.decisions.len();
            let completed = session
                .decisions
                .iter()
                .filter(|d| d.vote_count() >= min_votes)
                .count();
            session.progress = if total == 0 {
                0.0
            } else {
                completed as f64 / total as f64
            };

            let before = session.phase;
            if session.has_open_conflicts() {
                session.phase = SessionPhase::Resolving;
            } else {
                if session.phase == SessionPhase::Initialized && session.progress > 0.0 {
                    session.phase = SessionPhase::Collecting;
                }
                if session.progress >= 0.5
                    && matches!(
                        session.phase,
                        SessionPhase::Collecting | SessionPhase::Resolving
                    )
                {
                    session.phase = SessionPhase::Consensus;
                }
            }
            if session.phase != before {
                debug!(
                    "会话 {} 阶段 {:?} -> {:?} (进度 {:.2})",
                    session.id, before, session.phase, session.progress
                );
            }
        }
    }

    /// 对处于 consensus 阶段的会话形成协议
    fn build_agreements(
        &self,
        state: &mut CoordinatorState,
        now: DateTime<Utc>,
        report: &mut CoordinateReport,
    ) {
        let quorum = self.config.quorum_size;
        let ready: Vec<String> = state
            .sessions
            .values()
            .filter(|s| s.phase == SessionPhase::Consensus)
            .map(|s| s.id.clone())
            .collect();

        for session_id in ready {
            let Some(session) = state.sessions.get(&session_id) else {
                continue;
            };
            let participants = session.participants.len();
            let voted: Vec<&Decision> = session
                .decisions
                .iter()
                .filter(|d| d.vote_count() >= participants)
                .collect();
            if voted.is_empty() {
                continue;
            }

            let mut terms = Vec::with_capacity(voted.len());
            let mut failure = None;
            for decision in &voted {
                match decision.unanimous_value() {
                    Some(accepted) if decision.vote_count() >= quorum => terms.push(Term {
                        index: terms.len(),
                        decision_id: decision.id.clone(),
                        topic: decision.topic.clone(),
                        value: decision.value.clone(),
                        accepted,
                    }),
                    _ => {
                        failure = Some(ControlPlaneError::consensus(format!(
                            "会话 {} 的决议 {} 未获一致投票",
                            session_id, decision.topic
                        )));
                        break;
                    }
                }
            }

            if let Some(error) = failure {
                warn!("{}", error);
                state.counters.consensus_failures += 1;
                state.record(now, &session_id, "consensus_failed", Some(error.to_string()));
                report.consensus_errors.push((session_id, error.to_string()));
                continue;
            }

            let signatures: Vec<Signature> = session
                .participants
                .iter()
                .filter(|p| {
                    state
                        .processes
                        .get(*p)
                        .is_some_and(|process| process.state == ProcessState::Active)
                })
                .map(|p| Signature {
                    process_id: p.clone(),
                    signed_at: now,
                })
                .collect();

            let mut agreement = Agreement {
                id: Uuid::new_v4().to_string(),
                session_id: session_id.clone(),
                terms,
                signatures,
                state: AgreementState::Draft,
                created_at: now,
            };

            if agreement.signatures.len() < quorum {
                agreement.state = AgreementState::Abandoned;
                warn!(
                    "会话 {} 的协议签名不足 ({}/{})，本周期放弃",
                    session_id,
                    agreement.signatures.len(),
                    quorum
                );
                state.counters.agreements_abandoned += 1;
                state.record(now, &session_id, "agreement_abandoned", None);
                state.agreements.push(agreement);
                report.agreements_abandoned += 1;
                continue;
            }

            agreement.state = AgreementState::Completed;
            info!(
                "会话 {} 达成协议 {} ({} 条条款，{} 个签名)",
                session_id,
                agreement.id,
                agreement.terms.len(),
                agreement.signatures.len()
            );
            counter!("controlplane_consensus_agreements_total").increment(1);
            state.counters.agreements_completed += 1;
            state.counters.sessions_completed += 1;
            state.record(now, &session_id, "agreement_completed", Some(agreement.id.clone()));
            report.agreements.push(agreement.id.clone());
            state.agreements.push(agreement);
            state.finalize(&session_id, SessionPhase::Completed, now);
        }
    }

    /// 把待处理冲突交给解决器，期间不持有锁
    async fn resolve_conflicts(&self, report: &mut CoordinateReport) {
        let pending: Vec<(String, Conflict)> = {
            let mut state = self.state.write().await;
            let mut pending = Vec::new();
            for session in state.sessions.values_mut() {
                for conflict in session
                    .conflicts
                    .iter_mut()
                    .filter(|c| c.status == ConflictStatus::Pending)
                {
                    conflict.status = ConflictStatus::Resolving;
                    pending.push((session.id.clone(), conflict.clone()));
                }
            }
            pending
        };
        if pending.is_empty() {
            return;
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for (session_id, conflict) in pending {
            let result = self.resolver.resolve_conflict(&conflict).await;
            outcomes.push((session_id, conflict.id, result));
        }

        let now = self.clock.now();
        let mut state = self.state.write().await;
        for (session_id, conflict_id, result) in outcomes {
            let Some(conflict) = state
                .sessions
                .get_mut(&session_id)
                .and_then(|s| s.conflicts.iter_mut().find(|c| c.id == conflict_id))
            else {
                continue;
            };
            match result {
                Ok(resolution) => {
                    conflict.status = ConflictStatus::AutoResolved;
                    state.counters.conflicts_resolved += 1;
                    state.record(
                        now,
                        &session_id,
                        "conflict_resolved",
                        Some(format!(
                            "conflict={} confidence={:.2}",
                            conflict_id, resolution.result.confidence
                        )),
                    );
                    report.conflicts_resolved += 1;
                }
                Err(error) => {
                    conflict.status = ConflictStatus::Pending;
                    warn!("会话 {} 的冲突 {} 解决失败: {}", session_id, conflict_id, error);
                    state.governance.push(GovernanceRecord {
                        timestamp: now,
                        session_id: session_id.clone(),
                        conflict_id,
                        code: error.code().to_string(),
                        message: error.to_string(),
                    });
                    report.conflicts_failed += 1;
                }
            }
        }

        for session in state.sessions.values_mut() {
            if session.phase == SessionPhase::Resolving
                && !session.has_open_conflicts()
                && session.progress >= 0.5
            {
                session.phase = SessionPhase::Consensus;
                debug!("会话 {} 冲突已全部解决，进入共识阶段", session.id);
            }
        }
    }

    /// 进行中或最近结束的会话
    pub async fn session(&self, session_id: &str) -> Option<Session> {
        let state = self.state.read().await;
        state.sessions.get(session_id).cloned().or_else(|| {
            state
                .finished_sessions
                .iter()
                .find(|s| s.id == session_id)
                .cloned()
        })
    }

    pub async fn process(&self, process_id: &str) -> Option<Process> {
        self.state.read().await.processes.get(process_id).cloned()
    }

    pub async fn agreements(&self) -> Vec<Agreement> {
        self.state.read().await.agreements.to_vec()
    }

    pub async fn governance_history(&self) -> Vec<GovernanceRecord> {
        self.state.read().await.governance.to_vec()
    }

    pub async fn metrics(&self) -> CoordinatorMetrics {
        self.state.read().await.metrics()
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.state.read().await.history.to_vec()
    }

    pub async fn metric_points(&self) -> Vec<MetricPoint> {
        self.state.read().await.metric_points.to_vec()
    }
}
