//! # Run Engine
//!
//! Top-level driver of the run lifecycle:
//!
//! ```text
//! intake -> context_ready -> generating -> evaluating -> fix_loop ──┐
//!                               ^                                   │
//!                               └───────────────────────────────────┘
//!           evaluating -> approval_pending -> executing -> done
//!                                  └──────> rejected
//!           any non-terminal phase -> failed
//! ```
//!
//! The engine is the only writer of run status. One `advance` per run runs
//! at a time; every transition is committed through the run's [`Journal`]
//! and published before control returns.

use anyhow::anyhow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use crate::agents::{AgentInvoker, Evaluator, Executor};
use crate::approval::ApprovalGate;
use crate::config::EngineConfig;
use crate::error::{EngineError, ERROR_APPROVAL_REJECTED, ERROR_CANCELLED};
use crate::evaluation::{EvaluationController, LoopDecision};
use crate::events::{RunEvent, RunEventKind, StatusDelta};
use crate::policy::{IssueRouter, UseCasePolicy};
use crate::publisher::{BroadcastPublisher, ChannelPublisher, EventPublisher, Publisher, Subscription};
use crate::run::{
    AgentState, AgentStatus, ApprovalDecision, ApprovalStatus, Journal, NewRun, RunCell,
    RunContext, RunPhase, UseCase, EVALUATOR, EXECUTOR,
};
use crate::scheduler::Scheduler;
use crate::store::{Feedback, MemoryRunStore, RunStore, RunSummary};

/// Where `advance` left the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Suspended until `resume_after_approval`
    AwaitingApproval,
    Done,
    Failed,
    Rejected,
    Cancelled,
}

impl RunOutcome {
    fn of(state: &AgentState) -> Option<Self> {
        match state.phase() {
            RunPhase::ApprovalPending => Some(Self::AwaitingApproval),
            RunPhase::Done => Some(Self::Done),
            RunPhase::Rejected => Some(Self::Rejected),
            RunPhase::Failed if state.error() == Some(ERROR_CANCELLED) => Some(Self::Cancelled),
            RunPhase::Failed => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::AwaitingApproval)
    }
}

/// Where a run lives right now
enum Resolved {
    Active(Arc<RunCell>),
    /// Finished; only the stored record remains
    Archived(AgentState),
}

pub struct EngineBuilder {
    config: EngineConfig,
    agents: Option<Arc<dyn AgentInvoker>>,
    evaluator: Option<Arc<dyn Evaluator>>,
    executor: Option<Arc<dyn Executor>>,
    store: Option<Arc<dyn RunStore>>,
    sinks: Vec<Arc<dyn EventPublisher>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            agents: None,
            evaluator: None,
            executor: None,
            store: None,
            sinks: Vec::new(),
        }
    }

    pub fn with_agents(mut self, agents: Arc<dyn AgentInvoker>) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Use one service for all three collaborator seams
    pub fn with_collaborator<C>(self, collaborator: Arc<C>) -> Self
    where
        C: AgentInvoker + Evaluator + Executor + 'static,
    {
        self.with_agents(collaborator.clone())
            .with_evaluator(collaborator.clone())
            .with_executor(collaborator)
    }

    pub fn with_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Additionally forward every event into `tx`
    pub fn with_event_channel(mut self, tx: mpsc::Sender<RunEvent>) -> Self {
        self.sinks.push(Arc::new(ChannelPublisher::new(tx)));
        self
    }

    pub fn with_publisher(mut self, sink: Arc<dyn EventPublisher>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn build(self) -> anyhow::Result<Engine> {
        self.config.policy.validate()?;
        let router = self.config.policy.issue_routing.compile()?;

        let agents = self.agents.ok_or_else(|| anyhow!("no agent invoker configured"))?;
        let evaluator = self.evaluator.ok_or_else(|| anyhow!("no evaluator configured"))?;
        let executor = self.executor.ok_or_else(|| anyhow!("no executor configured"))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryRunStore::new()));

        let hub = Arc::new(BroadcastPublisher::new(self.config.event_buffer));
        let mut publisher = Publisher::new().with_sink(hub.clone());
        for sink in self.sinks {
            publisher = publisher.with_sink(sink);
        }

        Ok(Engine {
            config: self.config,
            router,
            agents,
            evaluator,
            executor,
            journal: Journal::new(store, publisher),
            hub,
            runs: RwLock::new(HashMap::new()),
        })
    }
}

pub struct Engine {
    config: EngineConfig,
    router: IssueRouter,
    agents: Arc<dyn AgentInvoker>,
    evaluator: Arc<dyn Evaluator>,
    executor: Arc<dyn Executor>,
    journal: Journal,
    hub: Arc<BroadcastPublisher>,
    /// Runs that have not reached a terminal state
    runs: RwLock<HashMap<String, Arc<RunCell>>>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Intake
    // =========================================================================

    /// Register a new run in `intake`. Returns its id.
    pub async fn create_run(&self, intake: NewRun) -> Result<String, EngineError> {
        if intake.request.trim().is_empty() {
            return Err(EngineError::InvalidRunState(
                "request must not be empty".to_string(),
            ));
        }
        if intake.user_id.trim().is_empty() {
            return Err(EngineError::InvalidRunState(
                "user_id must not be empty".to_string(),
            ));
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let state = AgentState::new(run_id.clone(), intake, self.config.max_fix_iterations);
        self.journal.store().save(&state)?;

        tracing::info!(
            run_id = %run_id,
            use_case = %state.use_case(),
            user_id = state.user_id(),
            "Run created"
        );
        self.runs
            .write()
            .await
            .insert(run_id.clone(), Arc::new(RunCell::new(state)));
        Ok(run_id)
    }

    /// Store the upstream context. Allowed once, before `start`.
    #[tracing::instrument(skip_all, fields(run_id = %run_id))]
    pub async fn attach_context(
        &self,
        run_id: &str,
        context: RunContext,
    ) -> Result<(), EngineError> {
        let cell = self.active(run_id, "attach_context").await?;
        self.journal
            .commit(&cell, |tx| {
                if tx.phase() != RunPhase::Intake {
                    return Err(EngineError::InvalidTransition {
                        operation: "attach_context",
                        phase: tx.phase(),
                    });
                }
                tx.attach_context(context)?;
                tx.set_phase(RunPhase::ContextReady);
                tx.emit_message(RunEventKind::Log, None, "context attached".to_string());
                Ok(())
            })
            .await
    }

    /// Validate preconditions and move to `generating`.
    #[tracing::instrument(skip_all, fields(run_id = %run_id))]
    pub async fn start(&self, run_id: &str) -> Result<(), EngineError> {
        let cell = self.active(run_id, "start").await?;
        let roles = {
            let state = cell.snapshot().await;
            self.policy(state.use_case())?.graph.topological_order()
        };

        self.journal
            .commit(&cell, |tx| {
                if tx.context().is_none() {
                    return Err(EngineError::InvalidRunState(
                        "context must be attached before start".to_string(),
                    ));
                }
                if tx.phase() != RunPhase::ContextReady {
                    return Err(EngineError::InvalidTransition {
                        operation: "start",
                        phase: tx.phase(),
                    });
                }
                tx.seed_statuses(&roles);
                tx.set_phase(RunPhase::Generating);
                tx.emit(RunEventKind::RunStarted, None);
                Ok(())
            })
            .await?;

        tracing::info!("Run started");
        Ok(())
    }

    // =========================================================================
    // Driving
    // =========================================================================

    /// Drive the run until it suspends on approval or terminates.
    ///
    /// Errors that end the run (`AgentTaskFailed`, `QualityGateExhausted`,
    /// collaborator failures) are recorded on the run before they are
    /// returned. `InvalidTransition` leaves the run untouched.
    #[tracing::instrument(skip_all, fields(run_id = %run_id))]
    pub async fn advance(&self, run_id: &str) -> Result<RunOutcome, EngineError> {
        let cell = match self.resolve(run_id).await? {
            Resolved::Active(cell) => cell,
            Resolved::Archived(state) => {
                return RunOutcome::of(&state).ok_or(EngineError::InvalidTransition {
                    operation: "advance",
                    phase: state.phase(),
                });
            }
        };

        let _driver = cell.lock_driver().await;
        match self.drive(&cell).await {
            Ok(outcome) => {
                if outcome.is_terminal() {
                    self.archive(run_id).await;
                }
                Ok(outcome)
            }
            Err(EngineError::Cancelled) => {
                self.archive(run_id).await;
                Ok(RunOutcome::Cancelled)
            }
            Err(e @ EngineError::InvalidTransition { .. }) => Err(e),
            Err(e) => {
                // An unrecorded failure keeps the run active so the store
                // never holds a non-terminal record nobody owns.
                if self.fail_run(&cell, &e).await {
                    self.archive(run_id).await;
                }
                Err(e)
            }
        }
    }

    async fn drive(&self, cell: &RunCell) -> Result<RunOutcome, EngineError> {
        loop {
            let state = cell.snapshot().await;
            let policy = self.policy(state.use_case())?;

            match state.phase() {
                RunPhase::Intake | RunPhase::ContextReady => {
                    return Err(EngineError::InvalidTransition {
                        operation: "advance",
                        phase: state.phase(),
                    });
                }
                RunPhase::Generating | RunPhase::FixLoop => {
                    self.generate(cell, &state, policy).await?;
                }
                RunPhase::Evaluating => {
                    if let Some(outcome) = self.evaluate(cell, &state, policy).await? {
                        return Ok(outcome);
                    }
                }
                RunPhase::Executing => {
                    self.execute(cell).await?;
                }
                RunPhase::ApprovalPending
                | RunPhase::Done
                | RunPhase::Failed
                | RunPhase::Rejected => {
                    return RunOutcome::of(&state).ok_or(EngineError::InvalidTransition {
                        operation: "advance",
                        phase: state.phase(),
                    });
                }
            }
        }
    }

    /// One scheduler pass: the whole graph first, then the retry subset.
    async fn generate(
        &self,
        cell: &RunCell,
        state: &AgentState,
        policy: &UseCasePolicy,
    ) -> Result<(), EngineError> {
        let graph = &policy.graph;
        let (subset, fix_context) = if state.phase() == RunPhase::FixLoop {
            let plan = self.controller().plan_retry(graph, state.evaluation_issues());
            let subset: BTreeSet<_> = state.rerun_roles().iter().copied().collect();
            (subset, plan.fix_context)
        } else {
            (graph.roles(), BTreeMap::new())
        };

        // Left over from a process that stopped mid-pass
        let interrupted: Vec<&str> = subset
            .iter()
            .map(|r| r.as_str())
            .filter(|name| state.agent_status(name) != Some(AgentStatus::Waiting))
            .collect();
        if !interrupted.is_empty() {
            self.journal
                .commit(cell, |tx| {
                    tx.reset_agent_statuses(interrupted.iter().copied());
                    tx.emit_message(
                        RunEventKind::Log,
                        None,
                        format!("re-running interrupted tasks: {}", interrupted.join(", ")),
                    );
                    Ok(())
                })
                .await?;
        }

        tracing::info!(
            fix_iteration = state.fix_iteration(),
            roles = ?subset,
            "Scheduling task graph"
        );

        Scheduler::new(self.agents.clone(), &self.journal, self.config.agent_timeout())
            .run_graph(cell, graph, &subset, &fix_context)
            .await?;

        self.journal
            .commit(cell, |tx| {
                tx.set_phase(RunPhase::Evaluating);
                tx.set_agent_status(EVALUATOR, AgentStatus::Running)?;
                tx.emit(RunEventKind::AgentUpdate, Some(EVALUATOR));
                Ok(())
            })
            .await
    }

    /// Score the generation and apply the loop policy. Returns an outcome
    /// when the run suspends.
    async fn evaluate(
        &self,
        cell: &RunCell,
        state: &AgentState,
        policy: &UseCasePolicy,
    ) -> Result<Option<RunOutcome>, EngineError> {
        let controller = self.controller();
        let gate = ApprovalGate::new(&self.config.policy);
        let evaluation = cell.until_cancelled(controller.evaluate(state)).await??;

        tracing::info!(
            score = evaluation.score,
            passed = evaluation.passed,
            issues = evaluation.issues.len(),
            "Evaluation finished"
        );

        let (decision, fix_iteration, phase) = self
            .journal
            .commit(cell, |tx| {
                tx.record_evaluation(evaluation);
                tx.set_agent_status(EVALUATOR, AgentStatus::Done)?;
                tx.emit(RunEventKind::AgentUpdate, Some(EVALUATOR));

                let decision = controller.decide(tx, &policy.graph);
                match &decision {
                    LoopDecision::Proceed if gate.required(tx.use_case()) => {
                        let pack = gate.build_pack(tx);
                        tx.open_approval(pack)?;
                        tx.set_phase(RunPhase::ApprovalPending);
                        tx.emit(RunEventKind::ApprovalRequired, None);
                    }
                    LoopDecision::Proceed => {
                        tx.set_phase(RunPhase::Executing);
                        tx.emit_message(
                            RunEventKind::Log,
                            None,
                            "evaluation passed, executing".to_string(),
                        );
                    }
                    LoopDecision::Retry(plan) => {
                        let iteration = tx.begin_fix_iteration(&plan.roles)?;
                        tx.set_phase(RunPhase::FixLoop);
                        let roles: Vec<_> = plan.roles.iter().map(|r| r.as_str()).collect();
                        tx.emit_message(
                            RunEventKind::FixIteration,
                            None,
                            format!("fix iteration {} re-running {}", iteration, roles.join(", ")),
                        );
                    }
                    LoopDecision::Exhausted => {}
                }
                Ok((decision, tx.fix_iteration(), tx.phase()))
            })
            .await?;

        match decision {
            LoopDecision::Proceed if phase == RunPhase::ApprovalPending => {
                tracing::info!("Waiting for approval");
                Ok(Some(RunOutcome::AwaitingApproval))
            }
            LoopDecision::Proceed => Ok(None),
            LoopDecision::Retry(_) => {
                tracing::info!(fix_iteration, "Evaluation failed, retrying");
                Ok(None)
            }
            LoopDecision::Exhausted => Err(EngineError::QualityGateExhausted {
                iterations: fix_iteration,
            }),
        }
    }

    async fn execute(&self, cell: &RunCell) -> Result<(), EngineError> {
        let snapshot = self
            .journal
            .commit(cell, |tx| {
                tx.set_agent_status(EXECUTOR, AgentStatus::Running)?;
                tx.emit(RunEventKind::AgentUpdate, Some(EXECUTOR));
                Ok(AgentState::clone(tx))
            })
            .await?;

        let limit = self.config.execution_timeout();
        let outcome = cell
            .until_cancelled(tokio::time::timeout(limit, self.executor.execute(&snapshot)))
            .await?
            .map_err(|_| EngineError::Collaborator {
                stage: EXECUTOR,
                reason: format!("timed out after {}s", limit.as_secs_f64()),
            })?
            .map_err(|e| EngineError::Collaborator {
                stage: EXECUTOR,
                reason: e.to_string(),
            })?;

        let pr_url = outcome.pr_url.clone();
        self.journal
            .commit(cell, |tx| {
                tx.record_execution(outcome);
                tx.set_agent_status(EXECUTOR, AgentStatus::Done)?;
                tx.set_phase(RunPhase::Done);
                tx.emit(RunEventKind::RunCompleted, None);
                Ok(())
            })
            .await?;

        tracing::info!(pr_url = pr_url.as_deref().unwrap_or("-"), "Run completed");
        Ok(())
    }

    /// Record `err` as the run's terminal failure unless it already ended.
    /// Returns `false` when the failure could not be persisted.
    async fn fail_run(&self, cell: &RunCell, err: &EngineError) -> bool {
        let recorded = self
            .journal
            .commit_forced(cell, |tx| {
                if tx.is_terminal() {
                    return Ok(false);
                }
                if let EngineError::Collaborator { stage, .. } = err {
                    if tx.agent_status(stage) == Some(AgentStatus::Running) {
                        tx.set_agent_status(stage, AgentStatus::Failed)?;
                    }
                }
                tx.fail(&err.run_error(), RunPhase::Failed);
                tx.emit(RunEventKind::RunFailed, None);
                Ok(true)
            })
            .await;

        match recorded {
            Ok(true) => {
                tracing::warn!(run_id = %cell.run_id(), "Run failed: {}", err);
                true
            }
            Ok(false) => true,
            Err(e) => {
                tracing::error!(
                    run_id = %cell.run_id(),
                    "Could not record run failure ({}): {}",
                    err,
                    e
                );
                false
            }
        }
    }

    // =========================================================================
    // Approval and cancellation
    // =========================================================================

    /// Deliver the human decision. On approval the run moves to `executing`
    /// and the caller drives it on with [`Engine::advance`]; on rejection it
    /// ends in `rejected`. Not pending: `InvalidTransition`, state unchanged.
    #[tracing::instrument(skip_all, fields(run_id = %run_id, decision = ?decision))]
    pub async fn resume_after_approval(
        &self,
        run_id: &str,
        decision: ApprovalDecision,
        comment: Option<String>,
    ) -> Result<RunPhase, EngineError> {
        let cell = self.active(run_id, "resume_after_approval").await?;
        let phase = self
            .journal
            .commit_forced(&cell, |tx| {
                if tx.phase() != RunPhase::ApprovalPending
                    || tx.approval_status() != Some(ApprovalStatus::Pending)
                {
                    return Err(EngineError::InvalidTransition {
                        operation: "resume_after_approval",
                        phase: tx.phase(),
                    });
                }
                tx.close_approval(decision, comment)?;
                tx.emit(RunEventKind::ApprovalReceived, None);
                match decision {
                    ApprovalDecision::Approved => tx.set_phase(RunPhase::Executing),
                    ApprovalDecision::Rejected => {
                        tx.fail(ERROR_APPROVAL_REJECTED, RunPhase::Rejected);
                        tx.emit(RunEventKind::RunFailed, None);
                    }
                }
                Ok(tx.phase())
            })
            .await?;

        tracing::info!(phase = %phase, "Approval decision recorded");
        if phase.is_terminal() {
            self.archive(run_id).await;
        }
        Ok(phase)
    }

    /// Cancel a non-terminal run. Returns `false` when there was nothing to
    /// cancel; a second call never publishes anything.
    #[tracing::instrument(skip_all, fields(run_id = %run_id))]
    pub async fn cancel(&self, run_id: &str) -> Result<bool, EngineError> {
        let Resolved::Active(cell) = self.resolve(run_id).await? else {
            return Ok(false);
        };

        {
            let mut state = cell.lock_state().await;
            if state.is_terminal() {
                return Ok(false);
            }
            self.journal.apply(&mut state, |tx| {
                if tx.approval_status() == Some(ApprovalStatus::Pending) {
                    tx.close_approval(ApprovalDecision::Rejected, None)?;
                }
                tx.fail(ERROR_CANCELLED, RunPhase::Failed);
                tx.emit(RunEventKind::RunFailed, None);
                Ok(())
            })?;
            cell.signal_cancelled();
        }

        tracing::info!("Run cancelled");
        self.archive(run_id).await;
        Ok(true)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn snapshot(&self, run_id: &str) -> Result<AgentState, EngineError> {
        match self.resolve(run_id).await? {
            Resolved::Active(cell) => Ok(cell.snapshot().await),
            Resolved::Archived(state) => Ok(state),
        }
    }

    /// Latest delta plus live updates. Finished runs yield their final delta
    /// and then end.
    pub async fn subscribe(&self, run_id: &str) -> Result<Subscription, EngineError> {
        let cell = match self.resolve(run_id).await? {
            Resolved::Active(cell) => cell,
            Resolved::Archived(state) => {
                return Ok(Subscription::closed(snapshot_event(&state)));
            }
        };

        let state = cell.lock_state().await;
        if state.is_terminal() {
            return Ok(Subscription::closed(snapshot_event(&state)));
        }
        let mut subscription = self
            .hub
            .subscribe(run_id)
            .map_err(|e| EngineError::Store(anyhow!("subscribe failed: {}", e)))?;
        if subscription.latest.is_none() {
            subscription.latest = Some(snapshot_event(&state));
        }
        Ok(subscription)
    }

    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>, EngineError> {
        Ok(self.journal.store().list(limit)?)
    }

    /// Feedback is accepted once, and only for finished runs.
    #[tracing::instrument(skip_all, fields(run_id = %run_id))]
    pub async fn record_feedback(&self, run_id: &str, feedback: Feedback) -> Result<(), EngineError> {
        let state = self.snapshot(run_id).await?;
        if !state.is_terminal() {
            return Err(EngineError::InvalidTransition {
                operation: "record_feedback",
                phase: state.phase(),
            });
        }
        let store = self.journal.store();
        if store.feedback(run_id)?.is_some() {
            return Err(EngineError::InvalidRunState(
                "feedback already recorded for this run".to_string(),
            ));
        }
        store.save_feedback(run_id, &feedback)?;
        tracing::info!(rating = feedback.rating.as_str(), "Feedback recorded");
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn controller(&self) -> EvaluationController<'_> {
        EvaluationController::new(
            self.evaluator.clone(),
            &self.router,
            self.config.evaluation_timeout(),
        )
    }

    fn policy(&self, use_case: UseCase) -> Result<&UseCasePolicy, EngineError> {
        self.config.policy.get(use_case).ok_or_else(|| {
            EngineError::InvalidRunState(format!("no policy for use case {}", use_case))
        })
    }

    fn load(&self, run_id: &str) -> Result<AgentState, EngineError> {
        self.journal
            .store()
            .load(run_id)?
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))
    }

    /// Active cell, or the reason `operation` cannot touch this run
    async fn active(&self, run_id: &str, operation: &'static str) -> Result<Arc<RunCell>, EngineError> {
        match self.resolve(run_id).await? {
            Resolved::Active(cell) => Ok(cell),
            Resolved::Archived(state) => Err(EngineError::InvalidTransition {
                operation,
                phase: state.phase(),
            }),
        }
    }

    /// Active cell for `run_id`. A run that is not finished but missing from
    /// the active map (a restarted process) is reloaded from the store and
    /// registered again.
    async fn resolve(&self, run_id: &str) -> Result<Resolved, EngineError> {
        if let Some(cell) = self.runs.read().await.get(run_id).cloned() {
            return Ok(Resolved::Active(cell));
        }
        let state = self.load(run_id)?;
        if state.is_terminal() {
            return Ok(Resolved::Archived(state));
        }

        let mut runs = self.runs.write().await;
        if let Some(cell) = runs.get(run_id) {
            return Ok(Resolved::Active(cell.clone()));
        }
        tracing::info!(run_id = %run_id, phase = %state.phase(), "Run reloaded from store");
        let cell = Arc::new(RunCell::new(state));
        runs.insert(run_id.to_string(), cell.clone());
        Ok(Resolved::Active(cell))
    }

    async fn archive(&self, run_id: &str) {
        if self.runs.write().await.remove(run_id).is_some() {
            tracing::debug!(run_id = %run_id, "Run archived");
        }
    }
}

/// A self-contained event describing the state as it is now
fn snapshot_event(state: &AgentState) -> RunEvent {
    let kind = match state.phase() {
        RunPhase::Done => RunEventKind::RunCompleted,
        RunPhase::Failed | RunPhase::Rejected => RunEventKind::RunFailed,
        RunPhase::ApprovalPending => RunEventKind::ApprovalRequired,
        _ => RunEventKind::AgentUpdate,
    };
    RunEvent::new(kind, state.event_seq(), StatusDelta::from_state(state))
}
