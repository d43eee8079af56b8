//! Edge tables and routing between graph nodes

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::engine::config::RunConfig;
use crate::engine::error::GraphError;
use crate::engine::graph::node::Next;
use crate::engine::state::FlowState;

/// Entry marker; direct edges from here form the initial frontier
pub const START: &str = "__start__";
/// Terminal marker; routing here ends the branch
pub const END: &str = "__end__";

/// Routing decision taken against the merged state at the end of a step
pub type RouterFn = Arc<dyn Fn(&FlowState, &RunConfig) -> Next + Send + Sync>;

/// Conditional hop: a router choosing among declared targets
#[derive(Clone)]
pub struct ConditionalEdge {
    pub targets: Vec<String>,
    pub router: RouterFn,
}

/// All declared edges of a graph.
///
/// Multiple direct edges from one source fan out; each target runs in the
/// following step. A source carries at most one conditional edge, and its
/// router may only pick targets the edge declared (or end the branch).
/// When a source has both kinds, its static targets stay enabled no matter
/// what the router picks.
#[derive(Clone, Default)]
pub struct EdgeCollection {
    direct: HashMap<String, Vec<String>>,
    conditional: HashMap<String, ConditionalEdge>,
}

impl EdgeCollection {
    pub fn add_direct(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.direct.entry(from.into()).or_default().push(to.into());
    }

    pub fn add_conditional(
        &mut self,
        from: impl Into<String>,
        edge: ConditionalEdge,
    ) -> Result<(), GraphError> {
        let from = from.into();
        if self.conditional.contains_key(&from) {
            return Err(GraphError::DuplicateRouter(from));
        }
        self.conditional.insert(from, edge);
        Ok(())
    }

    pub fn has_outgoing(&self, node: &str) -> bool {
        self.direct.contains_key(node) || self.conditional.contains_key(node)
    }

    /// Iterate direct edges as (from, to) pairs
    pub fn direct_edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.direct
            .iter()
            .flat_map(|(from, targets)| targets.iter().map(move |to| (from.as_str(), to.as_str())))
    }

    /// Iterate conditional edges by source node
    pub fn conditional_edges(&self) -> impl Iterator<Item = (&str, &ConditionalEdge)> {
        self.conditional
            .iter()
            .map(|(from, edge)| (from.as_str(), edge))
    }

    /// Direct targets of the START marker, in declaration order
    pub fn entry_targets(&self) -> Vec<String> {
        self.direct.get(START).cloned().unwrap_or_default()
    }

    /// Every node name any edge mentions, sources and targets alike
    pub fn referenced_nodes(&self) -> HashSet<&str> {
        let mut seen = HashSet::new();
        for (from, targets) in &self.direct {
            seen.insert(from.as_str());
            seen.extend(targets.iter().map(String::as_str));
        }
        for (from, edge) in &self.conditional {
            seen.insert(from.as_str());
            seen.extend(edge.targets.iter().map(String::as_str));
        }
        seen.remove(START);
        seen.remove(END);
        seen
    }

    /// Targets reachable from `node` through any declared edge
    pub fn declared_targets(&self, node: &str) -> Vec<&str> {
        let mut targets = Vec::new();
        if let Some(direct) = self.direct.get(node) {
            targets.extend(direct.iter().map(String::as_str));
        }
        if let Some(edge) = self.conditional.get(node) {
            targets.extend(edge.targets.iter().map(String::as_str));
        }
        targets
    }

    /// Declared predecessors of every target, START excluded. A target with
    /// more than one entry here is a fan-in point and waits for its live
    /// predecessors.
    pub fn predecessors(&self) -> HashMap<String, HashSet<String>> {
        let mut preds: HashMap<String, HashSet<String>> = HashMap::new();
        for (from, targets) in &self.direct {
            for target in targets {
                if target != END && from != START {
                    preds_entry_insert(&mut preds, target, from);
                }
            }
        }
        for (from, edge) in &self.conditional {
            for target in &edge.targets {
                if target != END {
                    preds_entry_insert(&mut preds, target, from);
                }
            }
        }
        preds
    }

    /// Resolve where control flows after `node`. Static targets are always
    /// enabled; a declared router adds its pick on top of them. A node with
    /// no outgoing edges, or whose router ends the branch with nothing
    /// static left, ends its branch.
    pub fn route_from(
        &self,
        node: &str,
        state: &FlowState,
        config: &RunConfig,
    ) -> Result<Next, GraphError> {
        let mut targets: Vec<String> = self
            .direct
            .get(node)
            .map(|targets| targets.iter().filter(|t| *t != END).cloned().collect())
            .unwrap_or_default();

        if let Some(edge) = self.conditional.get(node) {
            let picked = normalize((edge.router)(state, config));
            for target in picked.targets() {
                if !edge.targets.iter().any(|declared| declared == target) {
                    return Err(GraphError::UndeclaredRoute {
                        from: node.to_string(),
                        target: target.to_string(),
                    });
                }
                if !targets.iter().any(|known| known == target) {
                    targets.push(target.to_string());
                }
            }
        }

        Ok(match targets.len() {
            0 => Next::End,
            1 => Next::Single(targets.into_iter().next().unwrap_or_default()),
            _ => Next::Many(targets),
        })
    }
}

/// Collapse the END marker into the explicit terminal variant
pub fn normalize(next: Next) -> Next {
    match next {
        Next::Single(target) if target == END => Next::End,
        Next::Many(targets) => {
            let kept: Vec<String> = targets.into_iter().filter(|t| t != END).collect();
            if kept.is_empty() {
                Next::End
            } else {
                Next::Many(kept)
            }
        }
        other => other,
    }
}

fn preds_entry_insert(preds: &mut HashMap<String, HashSet<String>>, target: &str, from: &str) {
    preds
        .entry(target.to_string())
        .or_default()
        .insert(from.to_string());
}
