//! # Run Aggregate
//!
//! One `AgentState` per run. Fields are grouped by owner (context, agent
//! result slots, evaluation, approval, execution, status projection) and are
//! only reachable through accessors, so a writer of one group cannot touch
//! another group by accident.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::messages::{MessageLog, PendingAppend};
use super::types::{
    AgentRole, AgentStatus, ApprovalDecision, ApprovalStatus, RunPhase, RunSource, UseCase,
    EVALUATOR, EXECUTOR,
};
use crate::agents::{Evaluation, EvaluationIssue, ExecutionOutcome};
use crate::approval::ApprovalPack;
use crate::error::EngineError;

/// Default fix-iteration budget
pub const DEFAULT_MAX_FIX_ITERATIONS: u32 = 3;

/// Context supplied by the memory and retrieval services before `start`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    #[serde(default)]
    pub user_prefs: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub rag_chunks: Vec<serde_json::Value>,
    #[serde(default)]
    pub citations: Vec<serde_json::Value>,
}

/// Intake request for a new run
#[derive(Debug, Clone)]
pub struct NewRun {
    pub user_id: String,
    pub request: String,
    pub use_case: UseCase,
    pub source: RunSource,
    /// Overrides the configured budget for this run only
    pub max_fix_iterations: Option<u32>,
}

impl NewRun {
    pub fn new(user_id: &str, request: &str, use_case: UseCase) -> Self {
        Self {
            user_id: user_id.to_string(),
            request: request.to_string(),
            use_case,
            source: RunSource::default(),
            max_fix_iterations: None,
        }
    }
}

/// The full per-run record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    // --- Run info ---
    run_id: String,
    use_case: UseCase,
    user_id: String,
    request: String,
    #[serde(default)]
    source: RunSource,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    phase: RunPhase,

    // --- Context (write-once) ---
    #[serde(default)]
    context: Option<RunContext>,

    // --- Agent outputs ---
    #[serde(default)]
    messages: MessageLog,
    #[serde(default)]
    ba_result: Option<serde_json::Value>,
    #[serde(default)]
    arch_result: Option<serde_json::Value>,
    #[serde(default)]
    dev_result: Option<serde_json::Value>,
    #[serde(default)]
    qa_result: Option<serde_json::Value>,

    // --- Execution ---
    #[serde(default)]
    artifacts: Option<serde_json::Value>,
    #[serde(default)]
    diff: Option<String>,

    // --- Evaluation ---
    #[serde(default)]
    evaluation_score: Option<f64>,
    #[serde(default)]
    evaluation_issues: Vec<EvaluationIssue>,
    #[serde(default)]
    evaluation_passed: Option<bool>,

    // --- Approval ---
    #[serde(default)]
    approval_pack: Option<ApprovalPack>,
    #[serde(default)]
    approval_status: Option<ApprovalStatus>,
    #[serde(default)]
    rejection_comment: Option<String>,

    // --- Execution results ---
    #[serde(default)]
    pr_url: Option<String>,
    #[serde(default)]
    commit_hash: Option<String>,

    // --- Status projection ---
    #[serde(default)]
    agent_statuses: BTreeMap<String, AgentStatus>,

    // --- Loop control ---
    fix_iteration: u32,
    max_fix_iterations: u32,
    #[serde(default)]
    rerun_roles: Vec<AgentRole>,

    #[serde(default)]
    error: Option<String>,

    #[serde(default)]
    event_seq: u64,
}

impl AgentState {
    pub(crate) fn new(run_id: String, intake: NewRun, default_max_fix: u32) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            use_case: intake.use_case,
            user_id: intake.user_id,
            request: intake.request,
            source: intake.source,
            created_at: now,
            updated_at: now,
            phase: RunPhase::Intake,
            context: None,
            messages: MessageLog::new(),
            ba_result: None,
            arch_result: None,
            dev_result: None,
            qa_result: None,
            artifacts: None,
            diff: None,
            evaluation_score: None,
            evaluation_issues: Vec::new(),
            evaluation_passed: None,
            approval_pack: None,
            approval_status: None,
            rejection_comment: None,
            pr_url: None,
            commit_hash: None,
            agent_statuses: BTreeMap::new(),
            fix_iteration: 0,
            max_fix_iterations: intake.max_fix_iterations.unwrap_or(default_max_fix),
            rerun_roles: Vec::new(),
            error: None,
            event_seq: 0,
        }
    }

    // =========================================================================
    // Read accessors
    // =========================================================================

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn use_case(&self) -> UseCase {
        self.use_case
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn source(&self) -> RunSource {
        self.source
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn context(&self) -> Option<&RunContext> {
        self.context.as_ref()
    }

    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    /// Result slot owned by `role`
    pub fn result(&self, role: AgentRole) -> Option<&serde_json::Value> {
        match role {
            AgentRole::Ba => self.ba_result.as_ref(),
            AgentRole::Architect => self.arch_result.as_ref(),
            AgentRole::Dev => self.dev_result.as_ref(),
            AgentRole::Qa => self.qa_result.as_ref(),
        }
    }

    pub fn artifacts(&self) -> Option<&serde_json::Value> {
        self.artifacts.as_ref()
    }

    pub fn diff(&self) -> Option<&str> {
        self.diff.as_deref()
    }

    pub fn evaluation_score(&self) -> Option<f64> {
        self.evaluation_score
    }

    pub fn evaluation_issues(&self) -> &[EvaluationIssue] {
        &self.evaluation_issues
    }

    pub fn evaluation_passed(&self) -> Option<bool> {
        self.evaluation_passed
    }

    pub fn approval_pack(&self) -> Option<&ApprovalPack> {
        self.approval_pack.as_ref()
    }

    pub fn approval_status(&self) -> Option<ApprovalStatus> {
        self.approval_status
    }

    pub fn rejection_comment(&self) -> Option<&str> {
        self.rejection_comment.as_deref()
    }

    pub fn pr_url(&self) -> Option<&str> {
        self.pr_url.as_deref()
    }

    pub fn commit_hash(&self) -> Option<&str> {
        self.commit_hash.as_deref()
    }

    pub fn agent_statuses(&self) -> &BTreeMap<String, AgentStatus> {
        &self.agent_statuses
    }

    pub fn agent_status(&self, name: &str) -> Option<AgentStatus> {
        self.agent_statuses.get(name).copied()
    }

    pub fn fix_iteration(&self) -> u32 {
        self.fix_iteration
    }

    pub fn max_fix_iterations(&self) -> u32 {
        self.max_fix_iterations
    }

    /// Roles scheduled for the current fix-iteration (empty on the first pass)
    pub fn rerun_roles(&self) -> &[AgentRole] {
        &self.rerun_roles
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Sequence number of the last published event
    pub fn event_seq(&self) -> u64 {
        self.event_seq
    }

    // =========================================================================
    // Write accessors (crate-only; the engine and its components own them)
    // =========================================================================

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub(crate) fn next_event_seq(&mut self) -> u64 {
        self.event_seq += 1;
        self.event_seq
    }

    pub(crate) fn set_phase(&mut self, phase: RunPhase) {
        self.phase = phase;
    }

    pub(crate) fn attach_context(&mut self, context: RunContext) -> Result<(), EngineError> {
        if self.context.is_some() {
            return Err(EngineError::InvalidRunState(
                "context fields are write-once".to_string(),
            ));
        }
        self.context = Some(context);
        Ok(())
    }

    /// Move one status entry forward. Entries that do not exist yet start at
    /// `waiting`.
    pub(crate) fn set_agent_status(
        &mut self,
        name: &str,
        status: AgentStatus,
    ) -> Result<(), EngineError> {
        let current = self
            .agent_statuses
            .get(name)
            .copied()
            .unwrap_or(AgentStatus::Waiting);
        if current == status {
            return Ok(());
        }
        if !current.can_advance_to(status) {
            return Err(EngineError::InvalidRunState(format!(
                "status of {} cannot move from {:?} to {:?}",
                name, current, status
            )));
        }
        self.agent_statuses.insert(name.to_string(), status);
        Ok(())
    }

    /// Put entries back to `waiting` for a new fix-iteration.
    pub(crate) fn reset_agent_statuses<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            self.agent_statuses
                .insert(name.to_string(), AgentStatus::Waiting);
        }
    }

    /// Mark every entry that has not finished as skipped.
    pub(crate) fn skip_unfinished(&mut self) {
        for status in self.agent_statuses.values_mut() {
            if !status.is_terminal() {
                *status = AgentStatus::Skipped;
            }
        }
    }

    /// Write a completed task's result slot and merge its messages.
    pub(crate) fn store_results(&mut self, batch: Vec<(AgentRole, serde_json::Value)>) {
        for (role, value) in batch {
            let slot = match role {
                AgentRole::Ba => &mut self.ba_result,
                AgentRole::Architect => &mut self.arch_result,
                AgentRole::Dev => &mut self.dev_result,
                AgentRole::Qa => &mut self.qa_result,
            };
            *slot = Some(value);
        }
    }

    pub(crate) fn merge_messages(&mut self, batch: Vec<PendingAppend>) {
        self.messages.merge(batch);
    }

    pub(crate) fn record_evaluation(&mut self, evaluation: Evaluation) {
        self.evaluation_score = Some(evaluation.score);
        self.evaluation_issues = evaluation.issues;
        self.evaluation_passed = Some(evaluation.passed);
    }

    /// Consume one unit of the fix budget. Fails when the budget is spent.
    pub(crate) fn begin_fix_iteration(
        &mut self,
        roles: &BTreeSet<AgentRole>,
    ) -> Result<u32, EngineError> {
        if self.fix_iteration >= self.max_fix_iterations {
            return Err(EngineError::QualityGateExhausted {
                iterations: self.fix_iteration,
            });
        }
        self.fix_iteration += 1;
        self.rerun_roles = roles.iter().copied().collect();
        self.evaluation_passed = None;
        self.reset_agent_statuses(roles.iter().map(|r| r.as_str()));
        self.reset_agent_statuses([EVALUATOR]);
        Ok(self.fix_iteration)
    }

    pub(crate) fn open_approval(&mut self, pack: ApprovalPack) -> Result<(), EngineError> {
        if self.approval_status.is_some() {
            return Err(EngineError::InvalidRunState(
                "approval has already been requested for this run".to_string(),
            ));
        }
        self.approval_pack = Some(pack);
        self.approval_status = Some(ApprovalStatus::Pending);
        Ok(())
    }

    /// Settle a pending approval. The status becomes terminal exactly once.
    pub(crate) fn close_approval(
        &mut self,
        decision: ApprovalDecision,
        comment: Option<String>,
    ) -> Result<(), EngineError> {
        if self.approval_status != Some(ApprovalStatus::Pending) {
            return Err(EngineError::InvalidTransition {
                operation: "resume_after_approval",
                phase: self.phase,
            });
        }
        let status = ApprovalStatus::from(decision);
        self.approval_status = Some(status);
        if let Some(pack) = self.approval_pack.as_mut() {
            pack.settle(status, comment.clone());
        }
        if decision == ApprovalDecision::Rejected {
            self.rejection_comment = comment;
        }
        Ok(())
    }

    pub(crate) fn record_execution(&mut self, outcome: ExecutionOutcome) {
        self.artifacts = Some(outcome.artifacts);
        self.diff = outcome.diff;
        self.pr_url = outcome.pr_url;
        self.commit_hash = outcome.commit_hash;
    }

    /// Set the terminal error. The first error wins.
    pub(crate) fn fail(&mut self, error: &str, phase: RunPhase) {
        if self.error.is_none() {
            self.error = Some(error.to_string());
        }
        self.phase = phase;
        self.skip_unfinished();
    }

    /// Status keys the run tracks for its use case
    pub(crate) fn seed_statuses(&mut self, roles: &[AgentRole]) {
        self.agent_statuses.clear();
        self.reset_agent_statuses(roles.iter().map(|r| r.as_str()));
        self.reset_agent_statuses([EVALUATOR, EXECUTOR]);
    }
}
