//! # Approval Gate
//!
//! Builds the pack a human reviews and settles the decision. The gate never
//! waits by itself: opening it leaves the run in `approval_pending` and the
//! engine returns to its caller until `resume_after_approval` arrives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::PolicyTable;
use crate::run::{AgentRole, AgentState, ApprovalStatus, UseCase};

const SUMMARY_MAX_CHARS: usize = 160;

/// Kind of artifact listed in a pack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Markdown,
    Code,
    Diff,
    Zip,
    Url,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackArtifact {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
}

/// Review state as shown on the pack itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackStatus {
    PendingApproval,
    Approved,
    Rejected,
}

impl From<ApprovalStatus> for PackStatus {
    fn from(status: ApprovalStatus) -> Self {
        match status {
            ApprovalStatus::Pending => PackStatus::PendingApproval,
            ApprovalStatus::Approved => PackStatus::Approved,
            ApprovalStatus::Rejected => PackStatus::Rejected,
        }
    }
}

/// Summary artifact shown to the reviewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalPack {
    pub run_id: String,
    pub use_case: UseCase,
    pub summary: String,
    #[serde(default)]
    pub details: Option<String>,
    pub artifacts: Vec<PackArtifact>,
    #[serde(default)]
    pub diff: Option<String>,
    #[serde(default)]
    pub evaluation_score: Option<f64>,
    #[serde(default)]
    pub evaluation_issues: Vec<String>,
    pub status: PackStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rejection_comment: Option<String>,
}

impl ApprovalPack {
    pub(crate) fn settle(&mut self, status: ApprovalStatus, comment: Option<String>) {
        self.status = status.into();
        self.decided_at = Some(Utc::now());
        if status == ApprovalStatus::Rejected {
            self.rejection_comment = comment;
        }
    }
}

/// Decides whether a run needs sign-off and assembles its pack
pub struct ApprovalGate<'a> {
    policy: &'a PolicyTable,
}

impl<'a> ApprovalGate<'a> {
    pub fn new(policy: &'a PolicyTable) -> Self {
        Self { policy }
    }

    /// Approval is configured per use case, never per run.
    pub fn required(&self, use_case: UseCase) -> bool {
        self.policy
            .get(use_case)
            .map(|p| p.requires_approval)
            .unwrap_or(false)
    }

    /// Assemble the pack from the latest generation outputs and evaluation.
    pub fn build_pack(&self, state: &AgentState) -> ApprovalPack {
        let roles = self
            .policy
            .get(state.use_case())
            .map(|p| p.graph.topological_order())
            .unwrap_or_else(|| AgentRole::ALL.to_vec());

        let mut artifacts = Vec::new();
        let mut details = Vec::new();
        let mut diff = None;

        for role in roles {
            let Some(result) = state.result(role) else {
                continue;
            };
            details.push(format!("- {}: {}", role, describe(result)));
            artifacts.push(PackArtifact {
                name: format!("{} output", role),
                kind: kind_for(role),
                path: result
                    .get("path")
                    .and_then(|p| p.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("runs/{}/{}.json", state.run_id(), role)),
                preview_url: result
                    .get("preview_url")
                    .and_then(|p| p.as_str())
                    .map(str::to_string),
            });
            if let Some(d) = result.get("diff").and_then(|d| d.as_str()) {
                diff = Some(d.to_string());
            }
        }

        if diff.is_some() {
            artifacts.push(PackArtifact {
                name: "Proposed diff".to_string(),
                kind: ArtifactKind::Diff,
                path: format!("runs/{}/changes.diff", state.run_id()),
                preview_url: None,
            });
        }

        ApprovalPack {
            run_id: state.run_id().to_string(),
            use_case: state.use_case(),
            summary: summarize(state),
            details: (!details.is_empty()).then(|| details.join("\n")),
            artifacts,
            diff,
            evaluation_score: state.evaluation_score(),
            evaluation_issues: state
                .evaluation_issues()
                .iter()
                .map(|i| i.message.clone())
                .collect(),
            status: PackStatus::PendingApproval,
            created_at: Utc::now(),
            decided_at: None,
            rejection_comment: None,
        }
    }
}

fn kind_for(role: AgentRole) -> ArtifactKind {
    match role {
        AgentRole::Dev => ArtifactKind::Code,
        AgentRole::Ba | AgentRole::Architect | AgentRole::Qa => ArtifactKind::Markdown,
    }
}

fn describe(result: &serde_json::Value) -> String {
    match result.get("summary").and_then(|s| s.as_str()) {
        Some(summary) => summary.to_string(),
        None => match result {
            serde_json::Value::Object(map) => {
                let keys: Vec<_> = map.keys().map(String::as_str).collect();
                format!("fields {}", keys.join(", "))
            }
            serde_json::Value::String(s) => truncate(s),
            other => truncate(&other.to_string()),
        },
    }
}

fn summarize(state: &AgentState) -> String {
    let request = truncate(state.request());
    match state.evaluation_score() {
        Some(score) => format!("{} for \"{}\" (score {:.2})", state.use_case(), request, score),
        None => format!("{} for \"{}\"", state.use_case(), request),
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= SUMMARY_MAX_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(SUMMARY_MAX_CHARS).collect();
    cut.push_str("...");
    cut
}
