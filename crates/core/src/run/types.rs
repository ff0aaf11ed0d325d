//! # Run Vocabulary
//!
//! The closed enumerations shared by every part of the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of user request. Selects the task graph and approval policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseCase {
    DocGeneration,
    WebAppCreation,
    BotTeamSpec,
    MediaGeneration,
}

impl UseCase {
    pub const ALL: [UseCase; 4] = [
        UseCase::DocGeneration,
        UseCase::WebAppCreation,
        UseCase::BotTeamSpec,
        UseCase::MediaGeneration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocGeneration => "doc_generation",
            Self::WebAppCreation => "web_app_creation",
            Self::BotTeamSpec => "bot_team_spec",
            Self::MediaGeneration => "media_generation",
        }
    }

    /// Parse the wire name. Unknown names are rejected rather than defaulted.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|u| u.as_str() == s)
    }
}

impl fmt::Display for UseCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent roles that can appear in a task graph.
///
/// Declaration order is the static priority used to break ties when two
/// tasks complete at the same instant (ba < architect < dev < qa).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Ba,
    Architect,
    Dev,
    Qa,
}

impl AgentRole {
    pub const ALL: [AgentRole; 4] = [
        AgentRole::Ba,
        AgentRole::Architect,
        AgentRole::Dev,
        AgentRole::Qa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ba => "ba",
            Self::Architect => "architect",
            Self::Dev => "dev",
            Self::Qa => "qa",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == s)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status keys for the two non-agent stages tracked in `agent_statuses`.
pub const EVALUATOR: &str = "evaluator";
pub const EXECUTOR: &str = "executor";

/// Per-agent progress as shown on the status stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Waiting,
    Running,
    Done,
    Failed,
    Skipped,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Skipped)
    }

    /// Forward-only progression within one fix-iteration:
    /// `waiting -> running -> {done|failed|skipped}`, and `waiting -> skipped`
    /// for tasks that never got dispatched.
    pub fn can_advance_to(&self, next: AgentStatus) -> bool {
        match (self, next) {
            (Self::Waiting, Self::Running | Self::Skipped) => true,
            (Self::Running, Self::Done | Self::Failed | Self::Skipped) => true,
            _ => false,
        }
    }
}

/// Human sign-off state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// The external decision delivered to a paused run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl From<ApprovalDecision> for ApprovalStatus {
    fn from(decision: ApprovalDecision) -> Self {
        match decision {
            ApprovalDecision::Approved => ApprovalStatus::Approved,
            ApprovalDecision::Rejected => ApprovalStatus::Rejected,
        }
    }
}

/// Lifecycle position of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Created, context not yet attached
    Intake,
    /// Context attached, waiting for `start`
    ContextReady,
    /// Task graph executing
    Generating,
    /// Quality gate running
    Evaluating,
    /// Evaluation failed, re-running the implicated subset
    FixLoop,
    /// Suspended on a human decision
    ApprovalPending,
    /// Finalizing (commit / publish)
    Executing,
    Done,
    Failed,
    Rejected,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::ContextReady => "context_ready",
            Self::Generating => "generating",
            Self::Evaluating => "evaluating",
            Self::FixLoop => "fix_loop",
            Self::ApprovalPending => "approval_pending",
            Self::Executing => "executing",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Rejected)
    }

    /// Collapse the fine-grained phase into the four macro states.
    pub fn macro_status(&self) -> MacroStatus {
        match self {
            Self::Intake
            | Self::ContextReady
            | Self::Generating
            | Self::Evaluating
            | Self::FixLoop
            | Self::Executing => MacroStatus::Running,
            Self::ApprovalPending => MacroStatus::WaitingOnApproval,
            Self::Done => MacroStatus::Done,
            Self::Failed | Self::Rejected => MacroStatus::Failed,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroStatus {
    Running,
    WaitingOnApproval,
    Done,
    Failed,
}

/// Channel the request arrived through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSource {
    #[default]
    Web,
    Telegram,
}
