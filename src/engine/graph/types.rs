// SPDX-License-Identifier: MIT

//! Identifier, context, and outcome types for graph runs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::engine::config::RunConfig;

/// Unique identifier for one run of a graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token identifying one pending interrupt inside a suspended run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterruptToken(pub String);

impl InterruptToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InterruptToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-run context handed to every node alongside the state snapshot
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub config: RunConfig,
}

impl RunContext {
    pub fn new(run_id: RunId, config: RunConfig) -> Self {
        Self { run_id, config }
    }
}

/// Cooperative cancellation flag, observed by the runner between steps
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One pending interrupt the caller must answer to move a run forward
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptNotice {
    pub token: InterruptToken,
    pub node: String,
    pub payload: String,
}

/// What driving a run produced: terminal output, or suspension awaiting
/// resume values
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Complete {
        run_id: RunId,
        output: HashMap<String, Value>,
    },
    Suspended {
        run_id: RunId,
        interrupts: Vec<InterruptNotice>,
    },
}

impl RunOutcome {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::Complete { run_id, .. } => run_id,
            Self::Suspended { run_id, .. } => run_id,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    /// Terminal output, if the run completed
    pub fn output(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Self::Complete { output, .. } => Some(output),
            Self::Suspended { .. } => None,
        }
    }

    /// Pending interrupts, if the run suspended
    pub fn interrupts(&self) -> Option<&[InterruptNotice]> {
        match self {
            Self::Suspended { interrupts, .. } => Some(interrupts),
            Self::Complete { .. } => None,
        }
    }
}

/// Options bounding a runner
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Global step safety limit; `None` disables the guard. Routing logic
    /// remains responsible for bounding its own cycles.
    pub max_steps: Option<u32>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            max_steps: Some(100),
        }
    }
}
