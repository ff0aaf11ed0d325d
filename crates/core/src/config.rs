//! # Engine Configuration
//!
//! Budgets, collaborator timeouts and the policy table. Loaded from an
//! optional JSON file, then overlaid with per-deployment overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::policy::PolicyTable;
use crate::run::DEFAULT_MAX_FIX_ITERATIONS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fix-iteration budget for runs that do not set their own
    pub max_fix_iterations: u32,
    /// Upper bound for one agent invocation
    pub agent_timeout_secs: u64,
    pub evaluation_timeout_secs: u64,
    pub execution_timeout_secs: u64,
    /// Per-run buffer of the live event stream
    pub event_buffer: usize,
    pub policy: PolicyTable,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_fix_iterations: DEFAULT_MAX_FIX_ITERATIONS,
            agent_timeout_secs: 300,
            evaluation_timeout_secs: 120,
            execution_timeout_secs: 600,
            event_buffer: 256,
            policy: PolicyTable::default(),
        }
    }
}

impl EngineConfig {
    /// Read `path` when it exists, defaults otherwise.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn merge(&mut self, other: ConfigOverrides) {
        if let Some(v) = other.max_fix_iterations {
            self.max_fix_iterations = v;
        }
        if let Some(v) = other.agent_timeout_secs {
            self.agent_timeout_secs = v;
        }
        if let Some(v) = other.evaluation_timeout_secs {
            self.evaluation_timeout_secs = v;
        }
        if let Some(v) = other.execution_timeout_secs {
            self.execution_timeout_secs = v;
        }
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_secs(self.evaluation_timeout_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

/// Optional values layered over a loaded config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fix_iterations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_timeout_secs: Option<u64>,
}
