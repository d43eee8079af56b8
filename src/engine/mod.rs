// SPDX-License-Identifier: MIT

//! Core workflow engine
//!
//! - `config`: per-run configuration limits
//! - `error`: the error type hierarchy
//! - `event`: progress event stream
//! - `graph`: graph construction and the step-synchronous runner
//! - `limiter`: token-bucket rate limiting for provider calls
//! - `state`: schema-validated workflow state and reducers

pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod limiter;
pub mod state;
