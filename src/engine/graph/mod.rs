// SPDX-License-Identifier: MIT

//! Workflow graph construction and execution
//!
//! - `builder`: fluent graph assembly with compile-time validation
//! - `node`: the node contract and its outputs
//! - `edge`: edge tables, routing, and the START/END markers
//! - `runner`: the step-synchronous executor
//! - `checkpoint`: suspension snapshots and their storage
//! - `subgraph`: embedding one compiled graph inside another
//! - `policy`: reusable routing policies
//! - `types`: run identifiers, contexts, and outcomes

mod builder;
mod checkpoint;
mod edge;
mod node;
mod policy;
mod runner;
mod subgraph;
mod types;

pub use builder::{CompiledGraph, GraphBuilder};
pub use checkpoint::{
    Checkpoint, CheckpointBackend, CompletedNode, InMemoryCheckpointBackend, PendingInterrupt,
};
pub use edge::{ConditionalEdge, EdgeCollection, RouterFn, END, START};
pub use node::{InterruptRequest, Next, Node, NodeOutput, ResumeValue};
pub use policy::bounded_retry;
pub use runner::GraphRunner;
pub use subgraph::SubgraphNode;
pub use types::{
    CancelToken, InterruptNotice, InterruptToken, RunContext, RunId, RunOutcome, RunnerOptions,
};
