//! # Run Store
//!
//! Persistence seam for run records. The engine saves the full
//! `AgentState` after every transition, keyed by `run_id`.

mod memory;
mod sqlite;

pub use memory::MemoryRunStore;
pub use sqlite::SqliteRunStore;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::run::{AgentState, RunPhase, UseCase};

/// Row shown in run listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub use_case: UseCase,
    pub phase: RunPhase,
    pub updated_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn of(state: &AgentState) -> Self {
        Self {
            run_id: state.run_id().to_string(),
            use_case: state.use_case(),
            phase: state.phase(),
            updated_at: state.updated_at(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Good,
    Bad,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Bad => "bad",
        }
    }

}

impl FromStr for Rating {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "good" => Ok(Self::Good),
            "bad" => Ok(Self::Bad),
            other => Err(anyhow::anyhow!("unknown rating: {}", other)),
        }
    }
}

/// User feedback on a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub rating: Rating,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Feedback {
    pub fn new(rating: Rating, notes: Option<String>) -> Self {
        Self {
            rating,
            notes,
            created_at: Utc::now(),
        }
    }
}

pub trait RunStore: Send + Sync {
    /// Insert or replace the record for `state.run_id()`
    fn save(&self, state: &AgentState) -> Result<()>;

    fn load(&self, run_id: &str) -> Result<Option<AgentState>>;

    /// Most recently updated first
    fn list(&self, limit: usize) -> Result<Vec<RunSummary>>;

    fn save_feedback(&self, run_id: &str, feedback: &Feedback) -> Result<()>;

    fn feedback(&self, run_id: &str) -> Result<Option<Feedback>>;
}
