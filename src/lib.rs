// SPDX-License-Identifier: MIT

//! lattice-rs: a step-synchronous workflow graph engine
//!
//! Graphs are built from named async nodes joined by direct and conditional
//! edges over a shared typed state. The runner executes one frontier of
//! nodes per step, merges their buffered updates deterministically, and can
//! suspend a run at a human-input interrupt and resume it later from a
//! checkpoint. The `flows` module ships two graphs built on the engine: a
//! person-research flow and a document-processing flow with an embedded
//! review subgraph.

pub mod engine;
pub mod flows;
