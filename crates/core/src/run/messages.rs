//! # Message Log
//!
//! Append-only history of everything the agents produced for a run.
//! Entries are only ever appended; nothing is replaced or reordered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::types::AgentRole;

/// One agent-produced entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Agent that produced the entry
    pub agent: AgentRole,
    /// Fix-iteration the entry belongs to
    pub fix_iteration: u32,
    /// Payload as returned by the agent
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Messages from one finished task, waiting to be merged
#[derive(Debug, Clone)]
pub struct PendingAppend {
    pub role: AgentRole,
    pub completed_at: Instant,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageLog(Vec<Message>);

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.0
    }

    pub fn append(&mut self, message: Message) {
        self.0.push(message);
    }

    /// Merge a batch of task completions.
    ///
    /// Batches are appended in completion order; completions that share an
    /// instant are ordered by role priority. Each task's own messages keep
    /// their relative order.
    pub fn merge(&mut self, mut batch: Vec<PendingAppend>) {
        batch.sort_by(|a, b| {
            a.completed_at
                .cmp(&b.completed_at)
                .then_with(|| a.role.cmp(&b.role))
        });
        for pending in batch {
            self.0.extend(pending.messages);
        }
    }
}
