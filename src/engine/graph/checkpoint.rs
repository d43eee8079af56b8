// SPDX-License-Identifier: MIT

//! Run checkpoints: everything needed to suspend a run mid-step and pick it
//! up again later, plus the storage trait they persist through

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use crate::engine::config::RunConfig;
use crate::engine::error::EngineError;
use crate::engine::graph::node::Next;
use crate::engine::graph::types::{InterruptNotice, InterruptToken, RunId};
use crate::engine::state::StateUpdate;

/// Buffered effect of a node that finished inside the suspended step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedNode {
    pub update: StateUpdate,
    /// Routing override, when the node returned a command
    pub next: Option<Next>,
}

/// One interrupt still waiting for its resume value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingInterrupt {
    pub token: InterruptToken,
    pub node: String,
    pub payload: String,
}

/// Snapshot of a run suspended mid-step.
///
/// `state` is the state as it stood when the step began. Effects of frontier
/// nodes that already finished stay buffered in `completed` and are merged
/// only once every pending interrupt has been answered, so resumed nodes see
/// exactly the snapshot their siblings saw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: RunId,
    pub graph: String,
    pub step: u32,
    /// Run configuration captured at suspension, so resume needs nothing
    /// beyond the run id and a resume value
    pub config: RunConfig,
    pub state: HashMap<String, Value>,
    pub frontier: Vec<String>,
    pub completed: HashMap<String, CompletedNode>,
    pub pending: Vec<PendingInterrupt>,
    /// Fan-in bookkeeping carried across steps: which predecessors have
    /// already routed into each not-yet-ready target
    pub contributions: HashMap<String, HashSet<String>>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn pending_for(&self, token: &InterruptToken) -> Option<&PendingInterrupt> {
        self.pending.iter().find(|p| &p.token == token)
    }

    /// Pending interrupts as caller-facing notices
    pub fn notices(&self) -> Vec<InterruptNotice> {
        self.pending
            .iter()
            .map(|p| InterruptNotice {
                token: p.token.clone(),
                node: p.node.clone(),
                payload: p.payload.clone(),
            })
            .collect()
    }
}

/// Persistence for suspended runs. One checkpoint per run id; saving again
/// replaces the previous snapshot.
#[async_trait]
pub trait CheckpointBackend: Send + Sync {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), EngineError>;
    async fn load(&self, run_id: &RunId) -> Result<Option<Checkpoint>, EngineError>;
    async fn delete(&self, run_id: &RunId) -> Result<(), EngineError>;
}

/// Keeps checkpoints in process memory
#[derive(Default)]
pub struct InMemoryCheckpointBackend {
    store: RwLock<HashMap<RunId, Checkpoint>>,
}

impl InMemoryCheckpointBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointBackend for InMemoryCheckpointBackend {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), EngineError> {
        self.store
            .write()
            .await
            .insert(checkpoint.run_id.clone(), checkpoint);
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<Checkpoint>, EngineError> {
        Ok(self.store.read().await.get(run_id).cloned())
    }

    async fn delete(&self, run_id: &RunId) -> Result<(), EngineError> {
        self.store.write().await.remove(run_id);
        Ok(())
    }
}
