//! # Run Events
//!
//! State-delta notifications published after every run transition. Each
//! delta carries the full status projection, so a subscriber that joins late
//! only needs the most recent event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::run::{AgentState, AgentStatus, ApprovalStatus, MacroStatus, RunPhase};

/// Kind of run event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    /// Generation started
    RunStarted,
    /// An agent status changed
    AgentUpdate,
    /// Evaluation failed, a fix-iteration is starting
    FixIteration,
    /// Run suspended on a human decision
    ApprovalRequired,
    /// Human decision recorded
    ApprovalReceived,
    /// Run finished successfully
    RunCompleted,
    /// Run ended in `failed` or `rejected`
    RunFailed,
    /// Free-form progress note
    Log,
}

impl RunEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "run_started",
            Self::AgentUpdate => "agent_update",
            Self::FixIteration => "fix_iteration",
            Self::ApprovalRequired => "approval_required",
            Self::ApprovalReceived => "approval_received",
            Self::RunCompleted => "run_completed",
            Self::RunFailed => "run_failed",
            Self::Log => "log",
        }
    }
}

/// Self-describing snapshot carried by every event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDelta {
    pub run_id: String,
    pub phase: RunPhase,
    pub status: MacroStatus,
    pub agent_statuses: BTreeMap<String, AgentStatus>,
    pub fix_iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_passed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_status: Option<ApprovalStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusDelta {
    pub fn from_state(state: &AgentState) -> Self {
        Self {
            run_id: state.run_id().to_string(),
            phase: state.phase(),
            status: state.phase().macro_status(),
            agent_statuses: state.agent_statuses().clone(),
            fix_iteration: state.fix_iteration(),
            evaluation_score: state.evaluation_score(),
            evaluation_passed: state.evaluation_passed(),
            approval_status: state.approval_status(),
            pr_url: state.pr_url().map(str::to_string),
            commit_hash: state.commit_hash().map(str::to_string),
            error: state.error().map(str::to_string),
            message: None,
        }
    }
}

/// An event on a run's stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Unique event ID
    pub id: String,
    pub run_id: String,
    /// Per-run sequence number, strictly increasing
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: RunEventKind,
    /// Agent or stage the event is about
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub delta: StatusDelta,
}

impl RunEvent {
    pub(crate) fn new(kind: RunEventKind, seq: u64, delta: StatusDelta) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: delta.run_id.clone(),
            seq,
            timestamp: Utc::now(),
            kind,
            agent: None,
            delta,
        }
    }

    pub fn with_agent(mut self, agent: &str) -> Self {
        self.agent = Some(agent.to_string());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.delta.message = Some(message.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, RunEventKind::RunCompleted | RunEventKind::RunFailed)
    }
}
