//! In-memory run store for tests and database-less deployments.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{Feedback, RunStore, RunSummary};
use crate::run::AgentState;

#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<String, AgentState>>,
    feedback: Mutex<HashMap<String, Feedback>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for MemoryRunStore {
    fn save(&self, state: &AgentState) -> Result<()> {
        let mut runs = self
            .runs
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        runs.insert(state.run_id().to_string(), state.clone());
        Ok(())
    }

    fn load(&self, run_id: &str) -> Result<Option<AgentState>> {
        let runs = self
            .runs
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(runs.get(run_id).cloned())
    }

    fn list(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self
            .runs
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let mut summaries: Vec<_> = runs.values().map(RunSummary::of).collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries.truncate(limit);
        Ok(summaries)
    }

    fn save_feedback(&self, run_id: &str, feedback: &Feedback) -> Result<()> {
        let mut map = self
            .feedback
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        map.insert(run_id.to_string(), feedback.clone());
        Ok(())
    }

    fn feedback(&self, run_id: &str) -> Result<Option<Feedback>> {
        let map = self
            .feedback
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(map.get(run_id).cloned())
    }
}
