//! Node contract: the unit of work a graph schedules

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::error::EngineError;
use crate::engine::graph::types::RunContext;
use crate::engine::state::{FlowState, StateUpdate};

/// Where control flows after a node finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Next {
    /// Hand off to one named node
    Single(String),
    /// Fan out to several nodes, all scheduled in the following step
    Many(Vec<String>),
    /// Terminate this branch
    End,
}

impl Next {
    pub fn single(target: impl Into<String>) -> Self {
        Self::Single(target.into())
    }

    pub fn many<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Many(targets.into_iter().map(Into::into).collect())
    }

    /// Named targets of this hop, empty for `End`
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Self::Single(target) => vec![target.as_str()],
            Self::Many(targets) => targets.iter().map(String::as_str).collect(),
            Self::End => Vec::new(),
        }
    }
}

/// Request to pause the run and surface a payload to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptRequest {
    pub payload: String,
}

impl InterruptRequest {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// What one node invocation produced
#[derive(Debug, Clone)]
pub enum NodeOutput {
    /// Buffer a state update; routing follows the graph's edges
    Update(StateUpdate),
    /// Buffer a state update and override this node's routing
    Command { update: StateUpdate, next: Next },
    /// Suspend the run until the caller supplies a resume value
    Interrupt(InterruptRequest),
}

impl NodeOutput {
    /// Empty update, for nodes that only steer control flow
    pub fn empty() -> Self {
        Self::Update(StateUpdate::new())
    }
}

/// Caller's answer to an interrupt: an approval flag or free-form feedback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResumeValue {
    Approve(bool),
    Feedback(String),
}

impl TryFrom<Value> for ResumeValue {
    type Error = EngineError;

    fn try_from(value: Value) -> Result<Self, EngineError> {
        match value {
            Value::Bool(flag) => Ok(Self::Approve(flag)),
            Value::String(text) => Ok(Self::Feedback(text)),
            other => Err(EngineError::resume_contract(format!(
                "resume value must be a boolean or a string, got {}",
                json_type_name(&other)
            ))),
        }
    }
}

impl From<ResumeValue> for Value {
    fn from(value: ResumeValue) -> Self {
        match value {
            ResumeValue::Approve(flag) => Value::Bool(flag),
            ResumeValue::Feedback(text) => Value::String(text),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A unit of work scheduled by the graph runner.
///
/// `run` sees a snapshot of the state taken at the start of the step and
/// must return its full effect as a single output. Nodes that suspend via
/// [`NodeOutput::Interrupt`] are re-entered through `resume` with the same
/// snapshot once the caller answers.
#[async_trait]
pub trait Node: Send + Sync {
    async fn run(&self, state: &FlowState, ctx: &RunContext) -> Result<NodeOutput, EngineError>;

    /// Re-entry point after this node interrupted. Nodes that never
    /// interrupt keep the default, which rejects the resume.
    async fn resume(
        &self,
        _state: &FlowState,
        _ctx: &RunContext,
        _value: ResumeValue,
    ) -> Result<NodeOutput, EngineError> {
        Err(EngineError::resume_contract(
            "node does not accept resume values",
        ))
    }
}
