//! # Evaluation & Fix-Iteration Controller
//!
//! Scores the latest generation and decides what happens next: proceed,
//! re-run the implicated part of the graph, or give up.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crate::agents::{Evaluation, EvaluationIssue, Evaluator};
use crate::error::EngineError;
use crate::graph::TaskGraph;
use crate::policy::IssueRouter;
use crate::run::{AgentRole, AgentState, EVALUATOR};

/// Roles to re-run and the findings each of them should address
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryPlan {
    pub roles: BTreeSet<AgentRole>,
    pub fix_context: BTreeMap<AgentRole, Vec<EvaluationIssue>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopDecision {
    Proceed,
    Retry(RetryPlan),
    Exhausted,
}

pub struct EvaluationController<'a> {
    evaluator: Arc<dyn Evaluator>,
    router: &'a IssueRouter,
    timeout: Duration,
}

impl<'a> EvaluationController<'a> {
    pub fn new(evaluator: Arc<dyn Evaluator>, router: &'a IssueRouter, timeout: Duration) -> Self {
        Self {
            evaluator,
            router,
            timeout,
        }
    }

    /// Always yields a decision or an error; a missing decision is an error.
    pub async fn evaluate(&self, snapshot: &AgentState) -> Result<Evaluation, EngineError> {
        let evaluation = tokio::time::timeout(self.timeout, self.evaluator.score(snapshot))
            .await
            .map_err(|_| EngineError::Collaborator {
                stage: EVALUATOR,
                reason: format!("timed out after {}s", self.timeout.as_secs_f64()),
            })?
            .map_err(|e| EngineError::Collaborator {
                stage: EVALUATOR,
                reason: e.to_string(),
            })?;

        if !evaluation.score.is_finite() {
            return Err(EngineError::Collaborator {
                stage: EVALUATOR,
                reason: "score is not a number".to_string(),
            });
        }
        Ok(evaluation)
    }

    /// Loop policy, applied to a state that already carries the evaluation.
    pub fn decide(&self, state: &AgentState, graph: &TaskGraph) -> LoopDecision {
        match state.evaluation_passed() {
            Some(true) => LoopDecision::Proceed,
            _ if state.fix_iteration() < state.max_fix_iterations() => {
                LoopDecision::Retry(self.plan_retry(graph, state.evaluation_issues()))
            }
            _ => LoopDecision::Exhausted,
        }
    }

    /// Route every issue to a role, then close over dependents. Issues for
    /// roles outside the graph land on the graph's last task. Without any
    /// issue the whole graph re-runs.
    pub fn plan_retry(&self, graph: &TaskGraph, issues: &[EvaluationIssue]) -> RetryPlan {
        let mut fix_context: BTreeMap<AgentRole, Vec<EvaluationIssue>> = BTreeMap::new();
        for issue in issues {
            let mut role = self.router.route(issue);
            if !graph.contains(role) {
                match graph.terminal_role() {
                    Some(last) => role = last,
                    None => continue,
                }
            }
            fix_context.entry(role).or_default().push(issue.clone());
        }

        if fix_context.is_empty() {
            return RetryPlan {
                roles: graph.roles(),
                fix_context,
            };
        }

        let seeds: BTreeSet<AgentRole> = fix_context.keys().copied().collect();
        RetryPlan {
            roles: graph.dependents_closure(&seeds),
            fix_context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::IssueRouting;
    use anyhow::Result;
    use async_trait::async_trait;
    use AgentRole::*;

    struct Fixed(Evaluation);

    #[async_trait]
    impl Evaluator for Fixed {
        async fn score(&self, _snapshot: &AgentState) -> Result<Evaluation> {
            Ok(self.0.clone())
        }
    }

    fn controller<'a>(router: &'a IssueRouter, eval: Evaluation) -> EvaluationController<'a> {
        EvaluationController::new(Arc::new(Fixed(eval)), router, Duration::from_secs(5))
    }

    fn failing() -> Evaluation {
        Evaluation {
            score: 0.2,
            issues: vec![],
            passed: false,
        }
    }

    #[test]
    fn test_dev_issue_reruns_dev_and_qa() {
        let router = IssueRouting::default().compile().unwrap();
        let graph = TaskGraph::chain(&[Ba, Architect, Dev, Qa]);
        let plan = controller(&router, failing())
            .plan_retry(&graph, &[EvaluationIssue::new("code", "handler panics")]);

        assert_eq!(plan.roles.into_iter().collect::<Vec<_>>(), vec![Dev, Qa]);
        assert_eq!(plan.fix_context[&Dev].len(), 1);
        assert!(!plan.fix_context.contains_key(&Qa));
    }

    #[test]
    fn test_foreign_role_falls_to_last_task() {
        let router = IssueRouting::default().compile().unwrap();
        let graph = TaskGraph::chain(&[Ba, Dev]);
        let plan = controller(&router, failing())
            .plan_retry(&graph, &[EvaluationIssue::new("test", "no coverage")]);
        assert_eq!(plan.roles.into_iter().collect::<Vec<_>>(), vec![Dev]);
    }

    #[test]
    fn test_no_issues_reruns_everything() {
        let router = IssueRouting::default().compile().unwrap();
        let graph = TaskGraph::chain(&[Architect, Dev, Qa]);
        let plan = controller(&router, failing()).plan_retry(&graph, &[]);
        assert_eq!(plan.roles, graph.roles());
    }

    #[tokio::test]
    async fn test_nan_score_is_rejected() {
        let router = IssueRouting::default().compile().unwrap();
        let snapshot = AgentState::new(
            "r".to_string(),
            crate::run::NewRun::new("u", "q", crate::run::UseCase::MediaGeneration),
            3,
        );
        let eval = Evaluation {
            score: f64::NAN,
            issues: vec![],
            passed: true,
        };
        let err = controller(&router, eval).evaluate(&snapshot).await.unwrap_err();
        assert!(matches!(err, EngineError::Collaborator { stage: EVALUATOR, .. }));
    }
}
