// SPDX-License-Identifier: MIT

//! Typed error handling for lattice-rs
//!
//! This module provides the error type hierarchy using thiserror. Runtime
//! failures are split into fatal aborts and caller-contract violations so
//! resume misuse can be told apart from genuine downstream failures.

use thiserror::Error;

/// Top-level error type for lattice-rs
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration errors (missing required setting or input field)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failures from external collaborators (search, model, OCR, directory)
    #[error("Provider error from {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Structured output failed validation
    #[error("Malformed output from '{node}': {message}")]
    MalformedOutput { node: String, message: String },

    /// A node failed during a step; the whole run aborts
    #[error("Node '{node}' failed: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: Box<EngineError>,
    },

    /// Caller misused the resume contract: wrong value type, unknown
    /// run/token, or resuming a node that is not suspended
    #[error("Resume contract violation: {0}")]
    ResumeContract(String),

    /// Graph construction/validation errors
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Global step safety limit reached
    #[error("Max steps reached: {limit}")]
    MaxSteps { limit: u32 },

    /// Run cancelled through its cancel token
    #[error("Run cancelled")]
    Cancelled,

    /// Checkpoint persistence errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error wrapper for compatibility
    #[error("{0}")]
    Other(String),
}

/// Errors detected while building or routing a graph
#[derive(Debug, Error)]
pub enum GraphError {
    /// Node registered twice under the same name
    #[error("Duplicate node name: {0}")]
    DuplicateNode(String),

    /// Edge or projection references a node that was never registered
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// No edge leaves the START marker
    #[error("Graph '{0}' has no entry edge from START")]
    MissingEntry(String),

    /// Conditional edge declares a target that was never registered
    #[error("Conditional edge from '{from}' declares unknown target: {target}")]
    UnknownTarget { from: String, target: String },

    /// Input/output projection names a field missing from the state schema
    #[error("Projection key not in state schema: {0}")]
    UnknownProjectionKey(String),

    /// Nodes that no path from START can reach
    #[error("Unreachable nodes: {0:?}")]
    UnreachableNodes(Vec<String>),

    /// Router returned a target outside its declared set
    #[error("Router for '{from}' returned undeclared target: {target}")]
    UndeclaredRoute { from: String, target: String },

    /// Two conditional edges registered for the same source node
    #[error("Conditional edge already registered for '{0}'")]
    DuplicateRouter(String),

    /// Fan-in targets waiting on each other with no way to become ready
    #[error("Join deadlock between nodes: {0:?}")]
    JoinDeadlock(Vec<String>),
}

impl EngineError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a provider error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a malformed-output error
    pub fn malformed_output(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedOutput {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Create a resume-contract violation
    pub fn resume_contract(message: impl Into<String>) -> Self {
        Self::ResumeContract(message.into())
    }

    /// Wrap a node failure with the failing node's name
    pub fn node_failed(node: impl Into<String>, source: EngineError) -> Self {
        Self::NodeFailed {
            node: node.into(),
            source: Box::new(source),
        }
    }

    /// Create from a generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// True when the caller violated the resume contract, as opposed to a
    /// fatal fault inside the run itself
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::ResumeContract(_))
    }
}

// Allow conversion from &str for ad-hoc error sites
impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}
