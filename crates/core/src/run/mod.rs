//! # Run Model
//!
//! The per-run aggregate, its vocabulary and the cell that serializes
//! writes to it.

mod cell;
mod messages;
mod state;
mod types;

pub use cell::{Journal, RunCell};
pub(crate) use cell::Tx;
pub use messages::{Message, MessageLog, PendingAppend};
pub use state::{AgentState, NewRun, RunContext, DEFAULT_MAX_FIX_ITERATIONS};
pub use types::{
    AgentRole, AgentStatus, ApprovalDecision, ApprovalStatus, MacroStatus, RunPhase, RunSource,
    UseCase, EVALUATOR, EXECUTOR,
};
