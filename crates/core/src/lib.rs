//! # Foreman Core
//!
//! Run orchestration for a pipeline of AI agents: it schedules the agent
//! task graph of a use case, runs the quality gate with bounded fix
//! iterations, suspends on human approval and streams status deltas.
//!
//! ## Architecture
//!
//! - `run/` - the per-run `AgentState` aggregate and its write path
//! - `graph` / `policy` - task graphs and the declarative use-case table
//! - `scheduler` - dependency-driven, concurrent dispatch of agent tasks
//! - `evaluation` / `approval` - quality gate, fix loop and approval gate
//! - `engine` - lifecycle driver and public entry point
//! - `events` / `publisher` - status deltas and their delivery
//! - `store` - persistence of run records
//! - `agents` - collaborator contracts and the HTTP adapter
//!
//! ## Usage
//!
//! ```rust,ignore
//! use foreman_core::{Engine, EngineConfig, HttpCollaborator, NewRun, RunContext, UseCase};
//!
//! let engine = Engine::builder(EngineConfig::default())
//!     .with_collaborator(Arc::new(HttpCollaborator::new("http://localhost:8100")?))
//!     .build()?;
//! let run_id = engine.create_run(NewRun::new("u1", "Spec a support bot", UseCase::BotTeamSpec)).await?;
//! engine.attach_context(&run_id, RunContext::default()).await?;
//! engine.start(&run_id).await?;
//! let outcome = engine.advance(&run_id).await?;
//! ```

pub mod agents;
pub mod approval;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod events;
pub mod graph;
pub mod policy;
pub mod publisher;
pub mod run;
pub mod scheduler;
pub mod store;

pub use agents::{
    AgentInput, AgentInvoker, AgentReply, Evaluation, EvaluationIssue, Evaluator,
    ExecutionOutcome, Executor, HttpCollaborator, ReplyStatus,
};
pub use config::{ConfigOverrides, EngineConfig};
pub use engine::{Engine, EngineBuilder, RunOutcome};
pub use error::{EngineError, PublishError};
pub use events::{RunEvent, RunEventKind, StatusDelta};
pub use publisher::Subscription;
pub use run::{
    AgentRole, AgentState, AgentStatus, ApprovalDecision, ApprovalStatus, MacroStatus, NewRun,
    RunContext, RunPhase, RunSource, UseCase,
};
pub use store::{Feedback, Rating, RunStore, SqliteRunStore};
