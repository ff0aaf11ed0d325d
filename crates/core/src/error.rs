//! # Engine Errors
//!
//! Typed failures surfaced by engine operations. Adapter and persistence
//! internals use `anyhow` and are folded into [`EngineError::Store`] or
//! [`EngineError::Collaborator`] at the engine boundary.

use thiserror::Error;

use crate::run::{AgentRole, RunPhase};

/// Terminal error codes recorded in `AgentState::error`
pub const ERROR_CANCELLED: &str = "cancelled";
pub const ERROR_QUALITY_GATE_EXHAUSTED: &str = "quality_gate_exhausted";
pub const ERROR_APPROVAL_REJECTED: &str = "approval_rejected";

#[derive(Debug, Error)]
pub enum EngineError {
    /// Precondition violation, rejected before any side effect
    #[error("invalid run state: {0}")]
    InvalidRunState(String),

    /// Operation called outside the phase it is valid in
    #[error("{operation} is not valid while the run is {phase}")]
    InvalidTransition {
        operation: &'static str,
        phase: RunPhase,
    },

    #[error("agent task {role} failed: {reason}")]
    AgentTaskFailed { role: AgentRole, reason: String },

    #[error("quality gate exhausted after {iterations} fix iterations")]
    QualityGateExhausted { iterations: u32 },

    /// The run was cancelled while the operation was in progress
    #[error("run was cancelled")]
    Cancelled,

    #[error("run not found: {0}")]
    RunNotFound(String),

    /// Evaluator or executor failed to produce a result
    #[error("collaborator {stage} failed: {reason}")]
    Collaborator { stage: &'static str, reason: String },

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    /// Human-readable text recorded on the run when this error ends it
    pub fn run_error(&self) -> String {
        match self {
            Self::AgentTaskFailed { role, reason } => {
                format!("agent_task_failed: {}: {}", role, reason)
            }
            Self::QualityGateExhausted { .. } => ERROR_QUALITY_GATE_EXHAUSTED.to_string(),
            Self::Cancelled => ERROR_CANCELLED.to_string(),
            Self::Collaborator { stage, reason } => format!("{}_failed: {}", stage, reason),
            other => other.to_string(),
        }
    }
}

/// A delta could not be delivered. Never propagated past the engine.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event channel closed")]
    Closed,

    #[error("event channel full")]
    Full,
}
