// SPDX-License-Identifier: MIT

//! Graph assembly and compile-time validation

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde_json::Value;

use crate::engine::config::RunConfig;
use crate::engine::error::{EngineError, GraphError};
use crate::engine::graph::edge::{ConditionalEdge, EdgeCollection, END, START};
use crate::engine::graph::node::{Next, Node};
use crate::engine::state::{FlowState, StateSchema};

/// Fluent builder for a workflow graph.
///
/// Structural mistakes are collected as the graph is described and reported
/// together when [`GraphBuilder::compile`] runs, so call sites can chain
/// freely.
pub struct GraphBuilder {
    name: String,
    schema: StateSchema,
    nodes: HashMap<String, Arc<dyn Node>>,
    node_order: Vec<String>,
    edges: EdgeCollection,
    input_keys: Vec<String>,
    output_keys: Vec<String>,
    deferred: Vec<GraphError>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>, schema: StateSchema) -> Self {
        Self {
            name: name.into(),
            schema,
            nodes: HashMap::new(),
            node_order: Vec::new(),
            edges: EdgeCollection::default(),
            input_keys: Vec::new(),
            output_keys: Vec::new(),
            deferred: Vec::new(),
        }
    }

    /// Register a node under a unique name. Registration order is
    /// significant: it decides merge order when parallel branches write the
    /// same field in one step.
    pub fn add_node(mut self, id: impl Into<String>, node: Arc<dyn Node>) -> Self {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            self.deferred.push(GraphError::DuplicateNode(id));
            return self;
        }
        self.node_order.push(id.clone());
        self.nodes.insert(id, node);
        self
    }

    /// Declare a direct edge. Several edges from one source fan out.
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.add_direct(from, to);
        self
    }

    /// Declare the router for a source node together with every target it
    /// may pick. The END marker is a valid declared target.
    pub fn add_conditional<F>(
        mut self,
        from: impl Into<String>,
        targets: Vec<String>,
        router: F,
    ) -> Self
    where
        F: Fn(&FlowState, &RunConfig) -> Next + Send + Sync + 'static,
    {
        let edge = ConditionalEdge {
            targets,
            router: Arc::new(router),
        };
        if let Err(err) = self.edges.add_conditional(from, edge) {
            self.deferred.push(err);
        }
        self
    }

    /// Shorthand for `add_edge(START, to)`
    pub fn set_entry(self, to: impl Into<String>) -> Self {
        self.add_edge(START, to)
    }

    /// Restrict which fields `run` accepts as input
    pub fn input_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict which fields a completed run reports as output
    pub fn output_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Validate the described graph and freeze it for execution
    pub fn compile(mut self) -> Result<CompiledGraph, EngineError> {
        if let Some(err) = self.deferred.drain(..).next() {
            return Err(err.into());
        }

        for (from, to) in self.edges.direct_edges() {
            if from != START && !self.nodes.contains_key(from) {
                return Err(GraphError::UnknownNode(from.to_string()).into());
            }
            if to != END && !self.nodes.contains_key(to) {
                return Err(GraphError::UnknownNode(to.to_string()).into());
            }
        }
        for (from, edge) in self.edges.conditional_edges() {
            if !self.nodes.contains_key(from) {
                return Err(GraphError::UnknownNode(from.to_string()).into());
            }
            for target in &edge.targets {
                if target != END && !self.nodes.contains_key(target) {
                    return Err(GraphError::UnknownTarget {
                        from: from.to_string(),
                        target: target.clone(),
                    }
                    .into());
                }
            }
        }

        if self.edges.entry_targets().is_empty() {
            return Err(GraphError::MissingEntry(self.name).into());
        }

        let unreachable = self.unreachable_nodes();
        if !unreachable.is_empty() {
            return Err(GraphError::UnreachableNodes(unreachable).into());
        }

        for key in self.input_keys.iter().chain(self.output_keys.iter()) {
            if !self.schema.contains(key) {
                return Err(GraphError::UnknownProjectionKey(key.clone()).into());
            }
        }

        let predecessors = self.edges.predecessors();
        Ok(CompiledGraph {
            name: self.name,
            schema: self.schema,
            nodes: self.nodes,
            node_order: self.node_order,
            edges: self.edges,
            predecessors,
            input_keys: self.input_keys,
            output_keys: self.output_keys,
        })
    }

    fn unreachable_nodes(&self) -> Vec<String> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = self.edges.entry_targets().into();
        while let Some(node) = queue.pop_front() {
            if node == END || !visited.insert(node.clone()) {
                continue;
            }
            for target in self.edges.declared_targets(&node) {
                queue.push_back(target.to_string());
            }
        }
        self.node_order
            .iter()
            .filter(|id| !visited.contains(*id))
            .cloned()
            .collect()
    }
}

/// A validated, executable graph
pub struct CompiledGraph {
    pub name: String,
    pub(crate) schema: StateSchema,
    pub(crate) nodes: HashMap<String, Arc<dyn Node>>,
    pub(crate) node_order: Vec<String>,
    pub(crate) edges: EdgeCollection,
    pub(crate) predecessors: HashMap<String, HashSet<String>>,
    pub(crate) input_keys: Vec<String>,
    pub(crate) output_keys: Vec<String>,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("name", &self.name)
            .field("node_order", &self.node_order)
            .field("input_keys", &self.input_keys)
            .field("output_keys", &self.output_keys)
            .finish_non_exhaustive()
    }
}

impl CompiledGraph {
    pub fn node(&self, id: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.get(id)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Position in registration order, for deterministic merge ordering
    pub(crate) fn registration_index(&self, id: &str) -> usize {
        self.node_order
            .iter()
            .position(|name| name == id)
            .unwrap_or(usize::MAX)
    }

    /// Nodes that can still execute while `sources` are scheduled or
    /// waiting. Traversal never passes through `blocked`, so a predecessor
    /// only reachable via the blocked node itself does not count as live.
    pub(crate) fn reachable_excluding(
        &self,
        sources: impl Iterator<Item = impl AsRef<str>>,
        blocked: &str,
    ) -> HashSet<String> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = sources
            .map(|s| s.as_ref().to_string())
            .filter(|s| s != blocked)
            .collect();
        while let Some(node) = queue.pop_front() {
            if node == END || node == blocked || !visited.insert(node.clone()) {
                continue;
            }
            for target in self.edges.declared_targets(&node) {
                queue.push_back(target.to_string());
            }
        }
        visited
    }

    /// Seed a fresh state from schema defaults plus caller input.
    ///
    /// Input bypasses reducers: it seeds fields, it does not merge into
    /// them. Declared input keys close the accepted set; without a
    /// declaration any schema-valid field is accepted.
    pub(crate) fn initial_state(
        &self,
        input: HashMap<String, Value>,
    ) -> Result<FlowState, EngineError> {
        let mut state = FlowState::from_schema(&self.schema);
        let mut fields = state.values().clone();
        for (key, value) in input {
            if !self.input_keys.is_empty() && !self.input_keys.contains(&key) {
                return Err(EngineError::config(format!(
                    "input field '{key}' is not accepted by graph '{}'",
                    self.name
                )));
            }
            if let Err(reason) = self.schema.validate(&key, &value) {
                return Err(EngineError::config(format!("input field '{key}': {reason}")));
            }
            fields.insert(key, value);
        }
        state.restore(fields);
        Ok(state)
    }

    /// Project the final state down to the declared output keys. Fields the
    /// run never populated are omitted rather than reported as null.
    pub(crate) fn project_output(&self, state: &FlowState) -> HashMap<String, Value> {
        if self.output_keys.is_empty() {
            return state.values().clone();
        }
        self.output_keys
            .iter()
            .filter_map(|key| {
                state
                    .get(key)
                    .filter(|value| !value.is_null())
                    .map(|value| (key.clone(), value.clone()))
            })
            .collect()
    }
}
