// SPDX-License-Identifier: MIT

//! State management for workflow graphs
//!
//! This module provides:
//! - `StateSchema` - declares the shape, reducers, and defaults of state
//! - `FlowState` - runtime state storage with reducer-aware merging
//! - `StateUpdate` - the partial mapping nodes return

mod schema;
mod store;

pub use schema::{FieldType, ReducerType, StateFieldDef, StateSchema};
pub use store::{FlowState, StateUpdate};
