// SPDX-License-Identifier: MIT

//! Progress events emitted while a run executes
//!
//! Consumers subscribe through a bounded channel; emission is best effort so
//! a slow or dropped consumer never stalls the run itself.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::engine::graph::RunId;

/// Progress notification emitted by the runner as a run advances
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
        graph: String,
    },
    StepStarted {
        run_id: RunId,
        step: u32,
        frontier: Vec<String>,
    },
    NodeCompleted {
        run_id: RunId,
        step: u32,
        node: String,
    },
    NodeSuspended {
        run_id: RunId,
        step: u32,
        node: String,
    },
    RunSuspended {
        run_id: RunId,
        step: u32,
        pending: usize,
    },
    RunResumed {
        run_id: RunId,
        step: u32,
        node: String,
    },
    RunCompleted {
        run_id: RunId,
        steps: u32,
    },
    RunFailed {
        run_id: RunId,
        error: String,
    },
}

/// Transmit side handed to the runner
pub type EventSink = mpsc::Sender<RunEvent>;

/// Create a bounded event channel with the receive side wrapped as a stream
pub fn event_channel(capacity: usize) -> (EventSink, ReceiverStream<RunEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, ReceiverStream::new(rx))
}

pub(crate) fn emit(sink: &Option<EventSink>, event: RunEvent) {
    if let Some(sink) = sink {
        let _ = sink.try_send(event);
    }
}
