//! Embedding a compiled graph as a single node of a larger graph

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::error::EngineError;
use crate::engine::graph::node::{InterruptRequest, Node, NodeOutput, ResumeValue};
use crate::engine::graph::runner::GraphRunner;
use crate::engine::graph::types::{RunContext, RunId, RunOutcome};
use crate::engine::state::FlowState;

/// Runs a whole compiled graph as one node of a parent graph.
///
/// The child reads its input from the parent state through its own input
/// projection and reports its output projection back as this node's state
/// update. Interrupts raised inside the child surface unchanged through the
/// parent, and resuming the parent resumes the child's suspended node
/// rather than restarting the child.
pub struct SubgraphNode {
    runner: GraphRunner,
}

impl SubgraphNode {
    pub fn new(runner: GraphRunner) -> Self {
        Self { runner }
    }

    /// Child runs derive their id from the parent run, so a resumed parent
    /// finds the same suspended child without holding any node-local state
    fn child_run_id(&self, ctx: &RunContext) -> RunId {
        RunId::new(format!("{}:{}", ctx.run_id, self.runner.graph().name))
    }

    fn child_input(&self, state: &FlowState) -> HashMap<String, Value> {
        let graph = self.runner.graph();
        let keys: Vec<&String> = if graph.input_keys.is_empty() {
            state.values().keys().collect()
        } else {
            graph.input_keys.iter().collect()
        };
        keys.into_iter()
            .filter_map(|key| {
                state
                    .get(key)
                    .filter(|value| !value.is_null())
                    .map(|value| (key.clone(), value.clone()))
            })
            .collect()
    }

    fn relay(&self, outcome: RunOutcome) -> Result<NodeOutput, EngineError> {
        match outcome {
            RunOutcome::Complete { output, .. } => Ok(NodeOutput::Update(output)),
            // surface the child's payload untouched; the parent issues its
            // own token for it
            RunOutcome::Suspended { interrupts, .. } => match interrupts.into_iter().next() {
                Some(first) => Ok(NodeOutput::Interrupt(InterruptRequest::new(first.payload))),
                None => Err(EngineError::other(
                    "suspended subgraph reported no pending interrupts",
                )),
            },
        }
    }
}

#[async_trait]
impl Node for SubgraphNode {
    async fn run(&self, state: &FlowState, ctx: &RunContext) -> Result<NodeOutput, EngineError> {
        let child_id = self.child_run_id(ctx);
        let input = self.child_input(state);
        log::info!(
            "Starting subgraph '{}' as run {}",
            self.runner.graph().name,
            child_id
        );
        let outcome = self
            .runner
            .run_with_id(child_id, input, ctx.config.clone())
            .await?;
        self.relay(outcome)
    }

    async fn resume(
        &self,
        _state: &FlowState,
        ctx: &RunContext,
        value: ResumeValue,
    ) -> Result<NodeOutput, EngineError> {
        let child_id = self.child_run_id(ctx);
        let pending = self.runner.pending_interrupts(&child_id).await?;
        let notice = match pending.first() {
            Some(notice) => notice,
            None => {
                return Err(EngineError::resume_contract(format!(
                    "subgraph run '{child_id}' has no pending interrupt"
                )));
            }
        };
        let outcome = self
            .runner
            .resume(&child_id, &notice.token, value.into())
            .await?;
        self.relay(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::RunConfig;
    use crate::engine::graph::builder::GraphBuilder;
    use crate::engine::graph::edge::END;
    use crate::engine::state::{FieldType, ReducerType, StateSchema, StateUpdate};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct CountingGate {
        key: &'static str,
        runs: Arc<Mutex<u32>>,
        seen_document: Arc<Mutex<Option<String>>>,
    }

    #[async_trait]
    impl Node for CountingGate {
        async fn run(
            &self,
            state: &FlowState,
            _ctx: &RunContext,
        ) -> Result<NodeOutput, EngineError> {
            *self.runs.lock().unwrap() += 1;
            *self.seen_document.lock().unwrap() =
                state.get_str("document").map(ToString::to_string);
            Ok(NodeOutput::Interrupt(InterruptRequest::new(
                "review the extracted document",
            )))
        }

        async fn resume(
            &self,
            _state: &FlowState,
            _ctx: &RunContext,
            value: ResumeValue,
        ) -> Result<NodeOutput, EngineError> {
            let mut update = StateUpdate::new();
            match value {
                ResumeValue::Approve(flag) => {
                    update.insert(self.key.to_string(), json!(flag));
                }
                ResumeValue::Feedback(text) => {
                    update.insert(self.key.to_string(), json!(text));
                }
            }
            Ok(NodeOutput::Update(update))
        }
    }

    struct LoadDocument;

    #[async_trait]
    impl Node for LoadDocument {
        async fn run(
            &self,
            _state: &FlowState,
            _ctx: &RunContext,
        ) -> Result<NodeOutput, EngineError> {
            let mut update = StateUpdate::new();
            update.insert("document".to_string(), json!("bill of lading text"));
            Ok(NodeOutput::Update(update))
        }
    }

    fn child_graph(
        runs: &Arc<Mutex<u32>>,
        seen_document: &Arc<Mutex<Option<String>>>,
    ) -> GraphRunner {
        let schema = StateSchema::new()
            .field("document", FieldType::String, ReducerType::Overwrite)
            .field("approved", FieldType::Any, ReducerType::Overwrite);
        let graph = GraphBuilder::new("review_flow", schema)
            .add_node(
                "human_review",
                Arc::new(CountingGate {
                    key: "approved",
                    runs: Arc::clone(runs),
                    seen_document: Arc::clone(seen_document),
                }),
            )
            .set_entry("human_review")
            .add_edge("human_review", END)
            .input_keys(["document"])
            .output_keys(["approved"])
            .compile()
            .unwrap();
        GraphRunner::new(Arc::new(graph))
    }

    fn parent_graph(child: GraphRunner) -> GraphRunner {
        let schema = StateSchema::new()
            .field("document", FieldType::String, ReducerType::Overwrite)
            .field("approved", FieldType::Any, ReducerType::Overwrite);
        let graph = GraphBuilder::new("document", schema)
            .add_node("load_document", Arc::new(LoadDocument))
            .add_node("review_flow", Arc::new(SubgraphNode::new(child)))
            .set_entry("load_document")
            .add_edge("load_document", "review_flow")
            .add_edge("review_flow", END)
            .compile()
            .unwrap();
        GraphRunner::new(Arc::new(graph))
    }

    #[tokio::test]
    async fn test_child_interrupt_surfaces_unchanged_and_resume_reaches_child() {
        let runs = Arc::new(Mutex::new(0));
        let seen_document = Arc::new(Mutex::new(None));
        let parent = parent_graph(child_graph(&runs, &seen_document));

        let outcome = parent.run(HashMap::new(), RunConfig::new()).await.unwrap();
        let (run_id, interrupts) = match outcome {
            RunOutcome::Suspended { run_id, interrupts } => (run_id, interrupts),
            other => panic!("expected suspension, got {other:?}"),
        };
        assert_eq!(interrupts.len(), 1);
        assert_eq!(interrupts[0].node, "review_flow");
        assert_eq!(interrupts[0].payload, "review the extracted document");
        assert_eq!(
            seen_document.lock().unwrap().as_deref(),
            Some("bill of lading text"),
            "child must see the parent state through its input projection"
        );

        let outcome = parent
            .resume(&run_id, &interrupts[0].token, json!(true))
            .await
            .unwrap();
        let output = match outcome {
            RunOutcome::Complete { output, .. } => output,
            other => panic!("expected completion, got {other:?}"),
        };

        assert_eq!(output.get("approved"), Some(&json!(true)));
        assert_eq!(output.get("document"), Some(&json!("bill of lading text")));
        assert_eq!(
            *runs.lock().unwrap(),
            1,
            "resume must re-enter the suspended child node, not restart the child graph"
        );
    }

    #[tokio::test]
    async fn test_feedback_string_passes_through_to_child() {
        let runs = Arc::new(Mutex::new(0));
        let seen_document = Arc::new(Mutex::new(None));
        let parent = parent_graph(child_graph(&runs, &seen_document));

        let outcome = parent.run(HashMap::new(), RunConfig::new()).await.unwrap();
        let (run_id, interrupts) = match outcome {
            RunOutcome::Suspended { run_id, interrupts } => (run_id, interrupts),
            other => panic!("expected suspension, got {other:?}"),
        };

        let outcome = parent
            .resume(&run_id, &interrupts[0].token, json!("vessel name is wrong"))
            .await
            .unwrap();
        let output = match outcome {
            RunOutcome::Complete { output, .. } => output,
            other => panic!("expected completion, got {other:?}"),
        };
        assert_eq!(output.get("approved"), Some(&json!("vessel name is wrong")));
    }
}
