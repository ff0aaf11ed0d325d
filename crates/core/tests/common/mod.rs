//! Scripted in-process collaborators for engine tests.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use foreman_core::{
    AgentInput, AgentInvoker, AgentReply, AgentRole, AgentStatus, Engine, EngineConfig,
    Evaluation, EvaluationIssue, Evaluator, ExecutionOutcome, Executor, NewRun, RunContext,
    UseCase,
};

/// What an agent does on one invocation
#[derive(Debug, Clone)]
pub enum Step {
    /// Reply `done` with this result
    Reply(Value),
    /// Reply `failed` with this error
    Fail(String),
    /// Transport error
    Error(String),
    /// Sleep, then reply with the default result
    Delay(u64),
    /// Never finish
    Hang,
}

/// One recorded invocation
#[derive(Debug, Clone)]
pub struct Call {
    pub role: AgentRole,
    pub fix_iteration: u32,
    pub dependencies: Vec<AgentRole>,
    pub fix_context: Vec<EvaluationIssue>,
}

#[derive(Default)]
pub struct Script {
    steps: Mutex<HashMap<AgentRole, VecDeque<Step>>>,
    evaluations: Mutex<VecDeque<Evaluation>>,
    calls: Mutex<Vec<Call>>,
    scored: AtomicUsize,
    executions: AtomicUsize,
    execution_error: Mutex<Option<String>>,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn step(&self, role: AgentRole, step: Step) -> &Self {
        self.steps
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .push_back(step);
        self
    }

    /// Queue evaluation results. The last one repeats once the queue drains.
    pub fn evaluations(&self, evaluations: Vec<Evaluation>) -> &Self {
        self.evaluations.lock().unwrap().extend(evaluations);
        self
    }

    pub fn fail_execution(&self, reason: &str) -> &Self {
        *self.execution_error.lock().unwrap() = Some(reason.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, role: AgentRole) -> usize {
        self.calls().iter().filter(|c| c.role == role).count()
    }

    /// How many times the evaluator was asked for a score
    pub fn evaluations_run(&self) -> usize {
        self.scored.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

pub fn default_result(role: AgentRole, fix_iteration: u32) -> Value {
    json!({ "by": role.as_str(), "iteration": fix_iteration })
}

pub fn pass() -> Evaluation {
    Evaluation {
        score: 0.92,
        issues: vec![],
        passed: true,
    }
}

pub fn fail_with(category: &str, message: &str) -> Evaluation {
    Evaluation {
        score: 0.35,
        issues: vec![EvaluationIssue::new(category, message)],
        passed: false,
    }
}

#[async_trait]
impl AgentInvoker for Script {
    async fn invoke(&self, role: AgentRole, input: &AgentInput) -> Result<AgentReply> {
        self.calls.lock().unwrap().push(Call {
            role,
            fix_iteration: input.fix_iteration,
            dependencies: input.dependencies.keys().copied().collect(),
            fix_context: input.fix_context.clone(),
        });

        let step = self
            .steps
            .lock()
            .unwrap()
            .get_mut(&role)
            .and_then(|q| q.pop_front());

        match step {
            None => Ok(AgentReply::done(default_result(role, input.fix_iteration))),
            Some(Step::Reply(value)) => Ok(AgentReply::done(value)),
            Some(Step::Fail(reason)) => Ok(AgentReply::failed(reason)),
            Some(Step::Error(reason)) => Err(anyhow!(reason)),
            Some(Step::Delay(ms)) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(AgentReply::done(default_result(role, input.fix_iteration)))
            }
            Some(Step::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

#[async_trait]
impl Evaluator for Script {
    async fn score(&self, _snapshot: &foreman_core::AgentState) -> Result<Evaluation> {
        self.scored.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.evaluations.lock().unwrap();
        if queue.len() > 1 {
            return Ok(queue.pop_front().unwrap());
        }
        Ok(queue.front().cloned().unwrap_or_else(pass))
    }
}

#[async_trait]
impl Executor for Script {
    async fn execute(&self, snapshot: &foreman_core::AgentState) -> Result<ExecutionOutcome> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.execution_error.lock().unwrap().clone() {
            return Err(anyhow!(reason));
        }
        Ok(ExecutionOutcome {
            artifacts: json!([{ "name": "bundle", "path": format!("out/{}.zip", snapshot.run_id()) }]),
            diff: Some("+ generated".to_string()),
            pr_url: Some(format!("https://git.example/pr/{}", snapshot.run_id())),
            commit_hash: Some("abc123".to_string()),
        })
    }
}

pub fn engine(script: &Arc<Script>) -> Engine {
    engine_with(script, EngineConfig::default())
}

pub fn engine_with(script: &Arc<Script>, config: EngineConfig) -> Engine {
    Engine::builder(config)
        .with_collaborator(script.clone())
        .build()
        .unwrap()
}

/// Create, enrich and start a run
pub async fn started(engine: &Engine, use_case: UseCase) -> String {
    let run_id = engine
        .create_run(NewRun::new("user-1", "build the thing", use_case))
        .await
        .unwrap();
    engine
        .attach_context(&run_id, RunContext::default())
        .await
        .unwrap();
    engine.start(&run_id).await.unwrap();
    run_id
}

/// Poll until `role` reports `status`
pub async fn wait_for_status(engine: &Engine, run_id: &str, role: AgentRole, status: AgentStatus) {
    for _ in 0..200 {
        let state = engine.snapshot(run_id).await.unwrap();
        if state.agent_status(role.as_str()) == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never reached {:?}", role, status);
}
