//! # Collaborator Contracts
//!
//! The engine never talks to an LLM. It only knows the declared input and
//! output of the agents, the quality evaluator and the executor that performs
//! the final commit. Each seam is an `async_trait` so tests can script them
//! and deployments can point them at remote services (see [`http`]).

pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::run::{AgentRole, AgentState, RunContext, UseCase};

pub use http::HttpCollaborator;

/// Everything an agent receives for one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInput {
    pub run_id: String,
    pub use_case: UseCase,
    pub request: String,
    pub fix_iteration: u32,
    /// Result slots of the task's declared dependencies
    pub dependencies: BTreeMap<AgentRole, serde_json::Value>,
    /// Shared context populated before the run started
    pub context: RunContext,
    /// Evaluation findings routed to this role (empty on the first pass)
    #[serde(default)]
    pub fix_context: Vec<EvaluationIssue>,
}

/// Completion signal of an agent task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Done,
    Failed,
}

/// What an agent hands back: `{result, status, error?}` plus any message entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    pub result: serde_json::Value,
    pub status: ReplyStatus,
    #[serde(default)]
    pub error: Option<String>,
    /// Entries to append to the run's message log. When empty the result
    /// itself is logged.
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

impl AgentReply {
    pub fn done(result: serde_json::Value) -> Self {
        Self {
            result,
            status: ReplyStatus::Done,
            error: None,
            messages: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            result: serde_json::Value::Null,
            status: ReplyStatus::Failed,
            error: Some(error.into()),
            messages: Vec::new(),
        }
    }
}

/// A single quality-gate finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationIssue {
    /// Issue category used to route the fix (e.g. "code", "test", "architecture")
    #[serde(default)]
    pub category: Option<String>,
    pub message: String,
    #[serde(default)]
    pub severity: Option<String>,
}

impl EvaluationIssue {
    pub fn new(category: &str, message: &str) -> Self {
        Self {
            category: Some(category.to_string()),
            message: message.to_string(),
            severity: None,
        }
    }
}

/// Quality gate decision: `{score, issues[], passed}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<EvaluationIssue>,
    pub passed: bool,
}

/// Outputs of the final execution step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    #[serde(default)]
    pub artifacts: serde_json::Value,
    #[serde(default)]
    pub diff: Option<String>,
    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub commit_hash: Option<String>,
}

/// Runs one agent role. Re-invocation with the same input must be safe.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, role: AgentRole, input: &AgentInput) -> Result<AgentReply>;
}

/// Scores the latest generation outputs of a run.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn score(&self, snapshot: &AgentState) -> Result<Evaluation>;
}

/// Performs the final, outward-facing step (commit, PR, publish).
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, snapshot: &AgentState) -> Result<ExecutionOutcome>;
}
