// SPDX-License-Identifier: MIT

//! Run-scoped configuration
//!
//! `RunConfig` is a read-only mapping of integer policy limits supplied
//! once per run and visible to every node. It is not part of workflow
//! state and is never mutated by nodes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::error::EngineError;

/// Read-only per-run policy limits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(flatten)]
    limits: HashMap<String, i64>,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a limit, builder style
    pub fn with(mut self, key: impl Into<String>, value: i64) -> Self {
        self.limits.insert(key.into(), value);
        self
    }

    /// Look up a limit
    pub fn limit(&self, key: &str) -> Option<i64> {
        self.limits.get(key).copied()
    }

    /// Look up a limit, falling back to a default
    pub fn limit_or(&self, key: &str, default: i64) -> i64 {
        self.limits.get(key).copied().unwrap_or(default)
    }

    /// Look up a limit that must be present
    pub fn require(&self, key: &str) -> Result<i64, EngineError> {
        self.limit(key)
            .ok_or_else(|| EngineError::config(format!("missing required limit: {}", key)))
    }
}
