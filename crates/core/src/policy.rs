//! # Policy Table
//!
//! Declarative configuration: which task graph each use case runs, whether
//! it needs human sign-off, and which role answers for an evaluation issue.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::agents::EvaluationIssue;
use crate::graph::{TaskGraph, TaskNode};
use crate::run::{AgentRole, UseCase};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseCasePolicy {
    pub graph: TaskGraph,
    #[serde(default)]
    pub requires_approval: bool,
}

/// Regex matched against the text of an uncategorised issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRoute {
    pub pattern: String,
    pub role: AgentRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRouting {
    /// Lower-case category name to responsible role
    #[serde(default)]
    pub categories: BTreeMap<String, AgentRole>,
    #[serde(default)]
    pub patterns: Vec<PatternRoute>,
    pub fallback: AgentRole,
}

impl Default for IssueRouting {
    fn default() -> Self {
        let categories = [
            ("requirements", AgentRole::Ba),
            ("scope", AgentRole::Ba),
            ("architecture", AgentRole::Architect),
            ("design", AgentRole::Architect),
            ("code", AgentRole::Dev),
            ("implementation", AgentRole::Dev),
            ("bug", AgentRole::Dev),
            ("lint", AgentRole::Dev),
            ("test", AgentRole::Qa),
            ("coverage", AgentRole::Qa),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let patterns = [
            (r"\b(requirement|user stor(y|ies)|acceptance criteri)", AgentRole::Ba),
            (r"\b(architecture|component|interface|schema)\b", AgentRole::Architect),
            (r"\b(tests?|coverage|assert)", AgentRole::Qa),
        ]
        .into_iter()
        .map(|(p, role)| PatternRoute {
            pattern: p.to_string(),
            role,
        })
        .collect();

        Self {
            categories,
            patterns,
            fallback: AgentRole::Dev,
        }
    }
}

impl IssueRouting {
    pub fn compile(&self) -> Result<IssueRouter> {
        let patterns = self
            .patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){}", p.pattern))
                    .map(|re| (re, p.role))
                    .with_context(|| format!("Invalid issue pattern: {}", p.pattern))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(IssueRouter {
            categories: self
                .categories
                .iter()
                .map(|(k, v)| (k.to_lowercase(), *v))
                .collect(),
            patterns,
            fallback: self.fallback,
        })
    }
}

/// Compiled form of [`IssueRouting`]
#[derive(Debug, Clone)]
pub struct IssueRouter {
    categories: BTreeMap<String, AgentRole>,
    patterns: Vec<(Regex, AgentRole)>,
    fallback: AgentRole,
}

impl IssueRouter {
    /// Category first, then the first matching pattern, then the fallback.
    pub fn route(&self, issue: &EvaluationIssue) -> AgentRole {
        if let Some(role) = issue
            .category
            .as_deref()
            .and_then(|c| self.categories.get(&c.trim().to_lowercase()))
        {
            return *role;
        }
        self.patterns
            .iter()
            .find(|(re, _)| re.is_match(&issue.message))
            .map(|(_, role)| *role)
            .unwrap_or(self.fallback)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyTable {
    pub use_cases: BTreeMap<UseCase, UseCasePolicy>,
    #[serde(default)]
    pub issue_routing: IssueRouting,
}

impl Default for PolicyTable {
    fn default() -> Self {
        use AgentRole::*;

        let mut use_cases = BTreeMap::new();
        use_cases.insert(
            UseCase::BotTeamSpec,
            UseCasePolicy {
                graph: TaskGraph::new(vec![
                    TaskNode::new(Ba, &[]),
                    TaskNode::new(Architect, &[Ba]),
                    TaskNode::new(Dev, &[Ba, Architect]),
                    TaskNode::new(Qa, &[Dev]),
                ]),
                requires_approval: true,
            },
        );
        use_cases.insert(
            UseCase::WebAppCreation,
            UseCasePolicy {
                graph: TaskGraph::chain(&[Architect, Dev, Qa]),
                requires_approval: true,
            },
        );
        use_cases.insert(
            UseCase::DocGeneration,
            UseCasePolicy {
                graph: TaskGraph::chain(&[Ba, Dev]),
                requires_approval: false,
            },
        );
        use_cases.insert(
            UseCase::MediaGeneration,
            UseCasePolicy {
                graph: TaskGraph::chain(&[Dev]),
                requires_approval: false,
            },
        );

        Self {
            use_cases,
            issue_routing: IssueRouting::default(),
        }
    }
}

impl PolicyTable {
    pub fn get(&self, use_case: UseCase) -> Option<&UseCasePolicy> {
        self.use_cases.get(&use_case)
    }

    /// Every use case needs a valid graph, and every pattern must compile.
    pub fn validate(&self) -> Result<()> {
        for use_case in UseCase::ALL {
            let policy = self
                .get(use_case)
                .ok_or_else(|| anyhow!("no policy configured for use case {}", use_case))?;
            policy
                .graph
                .validate()
                .with_context(|| format!("Invalid task graph for {}", use_case))?;
        }
        self.issue_routing.compile()?;
        Ok(())
    }
}
