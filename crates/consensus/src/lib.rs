//! 共识协调与冲突解决
//!
//! 协调器收集参与进程的投票并形成协议；会话中的冲突交给解决器按策略处理。

pub mod conflict;
pub mod coordinator;
pub mod models;
pub mod resolution;
pub mod resolver;

pub use conflict::{Conflict, ConflictStatus, ConflictType, Party, Requirement};
pub use coordinator::ConsensusCoordinator;
pub use models::{
    Agreement, AgreementState, CoordinateReport, CoordinatorMetrics, Decision, GovernanceRecord,
    Process, ProcessSpec, ProcessState, Session, SessionPhase, Signature, Term,
};
pub use resolution::{
    ActionExecutor, Condition, FailureReason, LoggingActionExecutor, Operator, Resolution,
    ResolutionFailure, ResolutionResult, ResolutionStatus, ResolutionStep, ResolutionType,
    ResourceRecord, StepOutcome, Strategy, StrategyAction,
};
pub use resolver::{ConflictHandler, ConflictResolver};
