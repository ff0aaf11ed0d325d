//! # Task Dependency Scheduler
//!
//! Runs one pass over a subset of a use case's task graph. Tasks are
//! dispatched the moment every dependency slot they read is populated, run
//! concurrently on a `JoinSet`, and are merged back in completion order.
//! The first failed task stops the pass: unscheduled tasks are skipped and
//! in-flight siblings are aborted.

use anyhow::anyhow;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::Instant;

use crate::agents::{AgentInput, AgentInvoker, AgentReply, EvaluationIssue, ReplyStatus};
use crate::error::EngineError;
use crate::events::RunEventKind;
use crate::graph::TaskGraph;
use crate::run::{
    AgentRole, AgentState, AgentStatus, Journal, Message, PendingAppend, RunCell, Tx,
};

/// Outcome of one task as seen by the scheduler
struct Completion {
    role: AgentRole,
    completed_at: Instant,
    outcome: anyhow::Result<AgentReply>,
}

pub struct Scheduler<'a> {
    agents: Arc<dyn AgentInvoker>,
    journal: &'a Journal,
    timeout: Duration,
}

impl<'a> Scheduler<'a> {
    pub fn new(agents: Arc<dyn AgentInvoker>, journal: &'a Journal, timeout: Duration) -> Self {
        Self {
            agents,
            journal,
            timeout,
        }
    }

    /// Run `subset` of `graph` to completion.
    ///
    /// Dependencies inside the subset must complete during this pass;
    /// dependencies outside it must already have a populated slot.
    pub async fn run_graph(
        &self,
        cell: &RunCell,
        graph: &TaskGraph,
        subset: &BTreeSet<AgentRole>,
        fix_context: &BTreeMap<AgentRole, Vec<EvaluationIssue>>,
    ) -> Result<(), EngineError> {
        if subset.is_empty() {
            return Err(EngineError::InvalidRunState(
                "nothing to schedule".to_string(),
            ));
        }
        if let Some(foreign) = subset.iter().find(|r| !graph.contains(**r)) {
            return Err(EngineError::InvalidRunState(format!(
                "{} is not part of this use case's task graph",
                foreign
            )));
        }

        let mut pending: BTreeSet<AgentRole> = subset.clone();
        let mut completed: BTreeSet<AgentRole> = BTreeSet::new();
        let mut join_set: JoinSet<Completion> = JoinSet::new();

        loop {
            let ready: Vec<AgentRole> = pending
                .iter()
                .copied()
                .filter(|role| {
                    graph
                        .deps(*role)
                        .iter()
                        .all(|dep| !subset.contains(dep) || completed.contains(dep))
                })
                .collect();

            if !ready.is_empty() {
                let inputs = self
                    .journal
                    .commit(cell, |tx| {
                        let mut inputs = Vec::with_capacity(ready.len());
                        for role in &ready {
                            let input = build_input(tx, graph, *role, fix_context)?;
                            tx.set_agent_status(role.as_str(), AgentStatus::Running)?;
                            tx.emit(RunEventKind::AgentUpdate, Some(role.as_str()));
                            inputs.push((*role, input));
                        }
                        Ok(inputs)
                    })
                    .await;

                let inputs = match inputs {
                    Ok(inputs) => inputs,
                    Err(EngineError::Cancelled) => {
                        join_set.detach_all();
                        return Err(EngineError::Cancelled);
                    }
                    Err(e) => {
                        join_set.abort_all();
                        return Err(e);
                    }
                };

                for (role, input) in inputs {
                    pending.remove(&role);
                    tracing::debug!(run_id = %input.run_id, role = %role, "Dispatching agent task");
                    join_set.spawn(invoke(self.agents.clone(), role, input, self.timeout));
                }
            }

            if join_set.is_empty() {
                if pending.is_empty() {
                    return Ok(());
                }
                let stuck: Vec<_> = pending.iter().map(|r| r.as_str()).collect();
                return Err(EngineError::InvalidRunState(format!(
                    "tasks can never become ready: {}",
                    stuck.join(", ")
                )));
            }

            let first = match cell.until_cancelled(join_set.join_next()).await {
                Ok(joined) => joined,
                Err(cancelled) => {
                    // In-flight tasks may finish; their results are never merged.
                    join_set.detach_all();
                    return Err(cancelled);
                }
            };

            let mut batch = Vec::new();
            if let Some(joined) = first {
                batch.push(joined);
            }
            while let Some(joined) = join_set.try_join_next() {
                batch.push(joined);
            }

            let mut completions = Vec::with_capacity(batch.len());
            for joined in batch {
                match joined {
                    Ok(c) => completions.push(c),
                    Err(e) => {
                        join_set.abort_all();
                        return Err(EngineError::InvalidRunState(format!(
                            "agent task aborted: {}",
                            e
                        )));
                    }
                }
            }
            completions.sort_by(|a, b| {
                a.completed_at
                    .cmp(&b.completed_at)
                    .then_with(|| a.role.cmp(&b.role))
            });

            let merged = self
                .journal
                .commit(cell, |tx| merge_batch(tx, completions, &pending))
                .await;

            match merged {
                Ok(BatchOutcome::Merged(done)) => completed.extend(done),
                Ok(BatchOutcome::Failed { role, reason }) => {
                    join_set.abort_all();
                    return Err(EngineError::AgentTaskFailed { role, reason });
                }
                Err(EngineError::Cancelled) => {
                    tracing::warn!(run_id = %cell.run_id(), "Discarding agent results after cancellation");
                    join_set.detach_all();
                    return Err(EngineError::Cancelled);
                }
                Err(e) => {
                    join_set.abort_all();
                    return Err(e);
                }
            }
        }
    }
}

/// Input for `role`, read from the authoritative state under the lock.
fn build_input(
    state: &AgentState,
    graph: &TaskGraph,
    role: AgentRole,
    fix_context: &BTreeMap<AgentRole, Vec<EvaluationIssue>>,
) -> Result<AgentInput, EngineError> {
    let mut dependencies = BTreeMap::new();
    for dep in graph.deps(role) {
        let slot = state.result(*dep).ok_or_else(|| {
            EngineError::InvalidRunState(format!(
                "{} needs the {} result, which is not available",
                role, dep
            ))
        })?;
        dependencies.insert(*dep, slot.clone());
    }

    Ok(AgentInput {
        run_id: state.run_id().to_string(),
        use_case: state.use_case(),
        request: state.request().to_string(),
        fix_iteration: state.fix_iteration(),
        dependencies,
        context: state.context().cloned().unwrap_or_default(),
        fix_context: fix_context.get(&role).cloned().unwrap_or_default(),
    })
}

enum BatchOutcome {
    Merged(Vec<AgentRole>),
    /// First failure in completion order
    Failed { role: AgentRole, reason: String },
}

/// Write a batch of completions. A failure is recorded, not rolled back.
fn merge_batch(
    tx: &mut Tx<'_>,
    completions: Vec<Completion>,
    pending: &BTreeSet<AgentRole>,
) -> Result<BatchOutcome, EngineError> {
    let fix_iteration = tx.fix_iteration();
    let mut done = Vec::new();
    let mut results = Vec::new();
    let mut appends = Vec::new();
    let mut failure: Option<(AgentRole, String)> = None;

    for completion in completions {
        let role = completion.role;
        let reply = match completion.outcome {
            Ok(reply) if reply.status == ReplyStatus::Done => reply,
            Ok(reply) => {
                let reason = reply
                    .error
                    .unwrap_or_else(|| "agent reported failure".to_string());
                if failure.is_none() {
                    failure = Some((role, reason));
                }
                tx.set_agent_status(role.as_str(), AgentStatus::Failed)?;
                continue;
            }
            Err(e) => {
                if failure.is_none() {
                    failure = Some((role, e.to_string()));
                }
                tx.set_agent_status(role.as_str(), AgentStatus::Failed)?;
                continue;
            }
        };

        let entries = if reply.messages.is_empty() {
            vec![reply.result.clone()]
        } else {
            reply.messages
        };
        let now = Utc::now();
        appends.push(PendingAppend {
            role,
            completed_at: completion.completed_at,
            messages: entries
                .into_iter()
                .map(|content| Message {
                    agent: role,
                    fix_iteration,
                    content,
                    created_at: now,
                })
                .collect(),
        });
        results.push((role, reply.result));
        tx.set_agent_status(role.as_str(), AgentStatus::Done)?;
        done.push(role);
    }

    tx.store_results(results);
    tx.merge_messages(appends);
    for role in &done {
        tx.emit(RunEventKind::AgentUpdate, Some(role.as_str()));
    }

    let Some((role, reason)) = failure else {
        return Ok(BatchOutcome::Merged(done));
    };

    // Short-circuit: nothing else in this pass may still run or start.
    for other in pending {
        tx.set_agent_status(other.as_str(), AgentStatus::Skipped)?;
    }
    let running: Vec<String> = tx
        .agent_statuses()
        .iter()
        .filter(|(_, s)| **s == AgentStatus::Running)
        .map(|(name, _)| name.clone())
        .collect();
    for name in running {
        tx.set_agent_status(&name, AgentStatus::Skipped)?;
    }
    tx.emit_message(
        RunEventKind::AgentUpdate,
        Some(role.as_str()),
        format!("{} failed: {}", role, reason),
    );

    tracing::warn!(run_id = %tx.run_id(), role = %role, "Agent task failed: {}", reason);
    Ok(BatchOutcome::Failed { role, reason })
}

/// Aborts the agent call when its owning task is dropped or times out
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn invoke(
    agents: Arc<dyn AgentInvoker>,
    role: AgentRole,
    input: AgentInput,
    limit: Duration,
) -> Completion {
    // The call runs on its own task so a panicking agent still reports its role.
    let call = tokio::spawn(async move { agents.invoke(role, &input).await });
    let _abort = AbortOnDrop(call.abort_handle());

    let outcome = match tokio::time::timeout(limit, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(anyhow!("agent task panicked: {}", join)),
        Err(_) => Err(anyhow!("timed out after {}s", limit.as_secs_f64())),
    };

    Completion {
        role,
        completed_at: Instant::now(),
        outcome,
    }
}
