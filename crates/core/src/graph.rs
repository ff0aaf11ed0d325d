//! # Task Graph
//!
//! The DAG of agent roles a use case runs. Edges point from a task to the
//! tasks whose result slots it reads.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::run::AgentRole;

/// One task in a graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNode {
    pub role: AgentRole,
    #[serde(default)]
    pub depends_on: Vec<AgentRole>,
}

impl TaskNode {
    pub fn new(role: AgentRole, depends_on: &[AgentRole]) -> Self {
        Self {
            role,
            depends_on: depends_on.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
}

impl TaskGraph {
    pub fn new(nodes: Vec<TaskNode>) -> Self {
        Self { nodes }
    }

    /// Linear chain where every role depends on the one before it
    pub fn chain(roles: &[AgentRole]) -> Self {
        let nodes = roles
            .iter()
            .enumerate()
            .map(|(i, role)| {
                let deps = if i == 0 { vec![] } else { vec![roles[i - 1]] };
                TaskNode {
                    role: *role,
                    depends_on: deps,
                }
            })
            .collect();
        Self { nodes }
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, role: AgentRole) -> bool {
        self.nodes.iter().any(|n| n.role == role)
    }

    pub fn roles(&self) -> BTreeSet<AgentRole> {
        self.nodes.iter().map(|n| n.role).collect()
    }

    /// Declared dependencies of `role` (empty when the role is not in the graph)
    pub fn deps(&self, role: AgentRole) -> &[AgentRole] {
        self.nodes
            .iter()
            .find(|n| n.role == role)
            .map(|n| n.depends_on.as_slice())
            .unwrap_or(&[])
    }

    /// Reject duplicate roles, dangling edges and cycles.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(anyhow!("task graph has no tasks"));
        }

        let mut seen = BTreeSet::new();
        for node in &self.nodes {
            if !seen.insert(node.role) {
                return Err(anyhow!("duplicate task for role {}", node.role));
            }
        }

        for node in &self.nodes {
            for dep in &node.depends_on {
                if *dep == node.role {
                    return Err(anyhow!("task {} depends on itself", node.role));
                }
                if !seen.contains(dep) {
                    return Err(anyhow!(
                        "task {} depends_on unknown task {}",
                        node.role,
                        dep
                    ));
                }
            }
        }

        let order = self.topological_order();
        if order.len() != self.nodes.len() {
            let placed: BTreeSet<_> = order.into_iter().collect();
            let stuck: Vec<_> = self
                .nodes
                .iter()
                .map(|n| n.role)
                .filter(|r| !placed.contains(r))
                .map(|r| r.as_str())
                .collect();
            return Err(anyhow!(
                "task dependency cycle detected among roles: {}",
                stuck.join(", ")
            ));
        }

        Ok(())
    }

    /// Kahn order; roles that become ready together are ordered by priority.
    /// Roles caught in a cycle are left out.
    pub fn topological_order(&self) -> Vec<AgentRole> {
        let mut remaining: BTreeMap<AgentRole, BTreeSet<AgentRole>> = self
            .nodes
            .iter()
            .map(|n| (n.role, n.depends_on.iter().copied().collect()))
            .collect();

        let mut order = Vec::with_capacity(remaining.len());
        loop {
            let ready: Vec<AgentRole> = remaining
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(role, _)| *role)
                .collect();
            if ready.is_empty() {
                break;
            }
            for role in ready {
                remaining.remove(&role);
                for deps in remaining.values_mut() {
                    deps.remove(&role);
                }
                order.push(role);
            }
        }
        order
    }

    /// Last role in topological order (the graph's sink by priority)
    pub fn terminal_role(&self) -> Option<AgentRole> {
        self.topological_order().last().copied()
    }

    /// `seeds` plus everything that transitively depends on them
    pub fn dependents_closure(&self, seeds: &BTreeSet<AgentRole>) -> BTreeSet<AgentRole> {
        let mut closure: BTreeSet<AgentRole> = seeds
            .iter()
            .copied()
            .filter(|r| self.contains(*r))
            .collect();
        loop {
            let added: Vec<AgentRole> = self
                .nodes
                .iter()
                .filter(|n| !closure.contains(&n.role))
                .filter(|n| n.depends_on.iter().any(|d| closure.contains(d)))
                .map(|n| n.role)
                .collect();
            if added.is_empty() {
                return closure;
            }
            closure.extend(added);
        }
    }
}
