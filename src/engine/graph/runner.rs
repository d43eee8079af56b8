//! Step-synchronous graph runner
//!
//! Drives a compiled graph frontier by frontier. Every node in a step sees
//! the same snapshot of state taken when the step began; their updates are
//! buffered and merged in node registration order once the whole step has
//! finished. Interrupts park the step behind a checkpoint, and resume
//! re-enters only the suspended node against that same snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;

use crate::engine::config::RunConfig;
use crate::engine::error::{EngineError, GraphError};
use crate::engine::event::{emit, EventSink, RunEvent};
use crate::engine::graph::builder::CompiledGraph;
use crate::engine::graph::checkpoint::{
    Checkpoint, CheckpointBackend, CompletedNode, InMemoryCheckpointBackend, PendingInterrupt,
};
use crate::engine::graph::edge::normalize;
use crate::engine::graph::node::{NodeOutput, ResumeValue};
use crate::engine::graph::types::{
    CancelToken, InterruptNotice, InterruptToken, RunContext, RunId, RunOutcome, RunnerOptions,
};
use crate::engine::state::FlowState;

/// Executes one compiled graph, including suspension and resume
pub struct GraphRunner {
    graph: Arc<CompiledGraph>,
    backend: Arc<dyn CheckpointBackend>,
    options: RunnerOptions,
    events: Option<EventSink>,
    cancel: Option<CancelToken>,
}

impl GraphRunner {
    pub fn new(graph: Arc<CompiledGraph>) -> Self {
        Self {
            graph,
            backend: Arc::new(InMemoryCheckpointBackend::new()),
            options: RunnerOptions::default(),
            events: None,
            cancel: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn CheckpointBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn graph(&self) -> &Arc<CompiledGraph> {
        &self.graph
    }

    /// Start a run under a fresh random id
    pub async fn run(
        &self,
        input: HashMap<String, Value>,
        config: RunConfig,
    ) -> Result<RunOutcome, EngineError> {
        self.run_with_id(RunId::random(), input, config).await
    }

    /// Start a run under a caller-chosen id. Refuses ids that already have a
    /// suspended checkpoint; those must be resumed, not restarted.
    pub async fn run_with_id(
        &self,
        run_id: RunId,
        input: HashMap<String, Value>,
        config: RunConfig,
    ) -> Result<RunOutcome, EngineError> {
        if self.backend.load(&run_id).await?.is_some() {
            return Err(EngineError::config(format!(
                "run '{run_id}' is suspended; resume it instead of starting over"
            )));
        }

        let state = self.graph.initial_state(input)?;
        let ctx = RunContext::new(run_id.clone(), config);

        log::info!("Run {} started on graph '{}'", run_id, self.graph.name);
        emit(
            &self.events,
            RunEvent::RunStarted {
                run_id: run_id.clone(),
                graph: self.graph.name.clone(),
            },
        );

        let mut frontier: Vec<String> = Vec::new();
        for target in self.graph.edges.entry_targets() {
            if !frontier.contains(&target) {
                frontier.push(target);
            }
        }
        self.drive(&ctx, state, frontier, HashMap::new(), 0).await
    }

    /// Answer one pending interrupt of a suspended run.
    ///
    /// Only the suspended node re-executes, against the snapshot its step
    /// started with. The step merges and the run moves on once no interrupt
    /// remains pending; until then each resume returns the outstanding set.
    pub async fn resume(
        &self,
        run_id: &RunId,
        token: &InterruptToken,
        value: Value,
    ) -> Result<RunOutcome, EngineError> {
        let mut checkpoint = match self.backend.load(run_id).await? {
            Some(checkpoint) => checkpoint,
            None => {
                return Err(EngineError::resume_contract(format!(
                    "no suspended run under id '{run_id}'"
                )));
            }
        };
        let position = match checkpoint.pending.iter().position(|p| &p.token == token) {
            Some(position) => position,
            None => {
                return Err(EngineError::resume_contract(format!(
                    "run '{run_id}' has no pending interrupt '{token}'"
                )));
            }
        };
        let resume_value = ResumeValue::try_from(value)?;

        let pending = checkpoint.pending.remove(position);
        let node = self.graph.node(&pending.node).cloned().ok_or_else(|| {
            EngineError::Checkpoint(format!(
                "checkpoint references unknown node '{}'",
                pending.node
            ))
        })?;

        let mut state = FlowState::from_schema(&self.graph.schema);
        state.restore(checkpoint.state.clone());
        let ctx = RunContext::new(run_id.clone(), checkpoint.config.clone());

        log::info!(
            "Run {} resumed at node '{}' (step {})",
            run_id,
            pending.node,
            checkpoint.step
        );
        emit(
            &self.events,
            RunEvent::RunResumed {
                run_id: run_id.clone(),
                step: checkpoint.step,
                node: pending.node.clone(),
            },
        );

        let output = match node.resume(&state, &ctx, resume_value).await {
            Ok(output) => output,
            // contract violations leave the stored checkpoint untouched so
            // the caller can retry with a valid value
            Err(err) if err.is_contract_violation() => return Err(err),
            Err(err) => {
                return self
                    .fail(run_id, EngineError::node_failed(pending.node, err))
                    .await;
            }
        };

        match output {
            NodeOutput::Interrupt(request) => {
                emit(
                    &self.events,
                    RunEvent::NodeSuspended {
                        run_id: run_id.clone(),
                        step: checkpoint.step,
                        node: pending.node.clone(),
                    },
                );
                checkpoint.pending.push(PendingInterrupt {
                    token: InterruptToken::random(),
                    node: pending.node,
                    payload: request.payload,
                });
            }
            NodeOutput::Update(update) => {
                emit(
                    &self.events,
                    RunEvent::NodeCompleted {
                        run_id: run_id.clone(),
                        step: checkpoint.step,
                        node: pending.node.clone(),
                    },
                );
                checkpoint
                    .completed
                    .insert(pending.node, CompletedNode { update, next: None });
            }
            NodeOutput::Command { update, next } => {
                emit(
                    &self.events,
                    RunEvent::NodeCompleted {
                        run_id: run_id.clone(),
                        step: checkpoint.step,
                        node: pending.node.clone(),
                    },
                );
                checkpoint.completed.insert(
                    pending.node,
                    CompletedNode {
                        update,
                        next: Some(next),
                    },
                );
            }
        }

        if !checkpoint.pending.is_empty() {
            checkpoint.created_at = Utc::now();
            let step = checkpoint.step;
            let notices = checkpoint.notices();
            self.backend.save(checkpoint).await?;
            emit(
                &self.events,
                RunEvent::RunSuspended {
                    run_id: run_id.clone(),
                    step,
                    pending: notices.len(),
                },
            );
            return Ok(RunOutcome::Suspended {
                run_id: run_id.clone(),
                interrupts: notices,
            });
        }

        let Checkpoint {
            step,
            completed,
            mut contributions,
            ..
        } = checkpoint;
        let frontier = match self.finalize_step(&ctx, &mut state, &completed, &mut contributions) {
            Ok(frontier) => frontier,
            Err(err) => return self.fail(run_id, err).await,
        };
        self.drive(&ctx, state, frontier, contributions, step).await
    }

    /// Pending interrupts of a suspended run, empty when the run id has no
    /// checkpoint
    pub async fn pending_interrupts(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<InterruptNotice>, EngineError> {
        Ok(self
            .backend
            .load(run_id)
            .await?
            .map(|checkpoint| checkpoint.notices())
            .unwrap_or_default())
    }

    async fn drive(
        &self,
        ctx: &RunContext,
        mut state: FlowState,
        mut frontier: Vec<String>,
        mut contributions: HashMap<String, HashSet<String>>,
        mut step: u32,
    ) -> Result<RunOutcome, EngineError> {
        loop {
            if frontier.is_empty() {
                self.backend.delete(&ctx.run_id).await?;
                log::info!("Run {} completed after {} step(s)", ctx.run_id, step);
                emit(
                    &self.events,
                    RunEvent::RunCompleted {
                        run_id: ctx.run_id.clone(),
                        steps: step,
                    },
                );
                return Ok(RunOutcome::Complete {
                    run_id: ctx.run_id.clone(),
                    output: self.graph.project_output(&state),
                });
            }

            step += 1;
            if let Some(limit) = self.options.max_steps {
                if step > limit {
                    return self.fail(&ctx.run_id, EngineError::MaxSteps { limit }).await;
                }
            }
            if let Some(cancel) = &self.cancel {
                if cancel.is_cancelled() {
                    return self.fail(&ctx.run_id, EngineError::Cancelled).await;
                }
            }

            log::info!(
                "Run {} step {}: executing {} node(s): {:?}",
                ctx.run_id,
                step,
                frontier.len(),
                frontier
            );
            emit(
                &self.events,
                RunEvent::StepStarted {
                    run_id: ctx.run_id.clone(),
                    step,
                    frontier: frontier.clone(),
                },
            );

            let snapshot = state.clone();
            let results = self.execute_frontier(ctx, &snapshot, &frontier).await;

            let mut completed: HashMap<String, CompletedNode> = HashMap::new();
            let mut interrupts: Vec<PendingInterrupt> = Vec::new();
            for (node, result) in results {
                match result {
                    Ok(NodeOutput::Update(update)) => {
                        emit(
                            &self.events,
                            RunEvent::NodeCompleted {
                                run_id: ctx.run_id.clone(),
                                step,
                                node: node.clone(),
                            },
                        );
                        completed.insert(node, CompletedNode { update, next: None });
                    }
                    Ok(NodeOutput::Command { update, next }) => {
                        emit(
                            &self.events,
                            RunEvent::NodeCompleted {
                                run_id: ctx.run_id.clone(),
                                step,
                                node: node.clone(),
                            },
                        );
                        completed.insert(
                            node,
                            CompletedNode {
                                update,
                                next: Some(next),
                            },
                        );
                    }
                    Ok(NodeOutput::Interrupt(request)) => {
                        log::info!("Run {} suspended by node '{}'", ctx.run_id, node);
                        emit(
                            &self.events,
                            RunEvent::NodeSuspended {
                                run_id: ctx.run_id.clone(),
                                step,
                                node: node.clone(),
                            },
                        );
                        interrupts.push(PendingInterrupt {
                            token: InterruptToken::random(),
                            node,
                            payload: request.payload,
                        });
                    }
                    Err(err) => {
                        return self
                            .fail(&ctx.run_id, EngineError::node_failed(node, err))
                            .await;
                    }
                }
            }

            if !interrupts.is_empty() {
                let checkpoint = Checkpoint {
                    run_id: ctx.run_id.clone(),
                    graph: self.graph.name.clone(),
                    step,
                    config: ctx.config.clone(),
                    state: snapshot.values().clone(),
                    frontier: frontier.clone(),
                    completed,
                    pending: interrupts,
                    contributions: contributions.clone(),
                    created_at: Utc::now(),
                };
                let notices = checkpoint.notices();
                self.backend.save(checkpoint).await?;
                emit(
                    &self.events,
                    RunEvent::RunSuspended {
                        run_id: ctx.run_id.clone(),
                        step,
                        pending: notices.len(),
                    },
                );
                return Ok(RunOutcome::Suspended {
                    run_id: ctx.run_id.clone(),
                    interrupts: notices,
                });
            }

            frontier = match self.finalize_step(ctx, &mut state, &completed, &mut contributions) {
                Ok(next) => next,
                Err(err) => return self.fail(&ctx.run_id, err).await,
            };
        }
    }

    async fn execute_frontier(
        &self,
        ctx: &RunContext,
        snapshot: &FlowState,
        frontier: &[String],
    ) -> Vec<(String, Result<NodeOutput, EngineError>)> {
        let tasks = frontier.iter().map(|id| {
            let id = id.clone();
            let node = self.graph.node(&id).cloned();
            async move {
                let result = match node {
                    Some(node) => node.run(snapshot, ctx).await,
                    None => Err(EngineError::from(GraphError::UnknownNode(id.clone()))),
                };
                (id, result)
            }
        });
        join_all(tasks).await
    }

    /// Merge the step's buffered updates in node registration order, route
    /// every completed node, and work out which targets form the next
    /// frontier.
    fn finalize_step(
        &self,
        ctx: &RunContext,
        state: &mut FlowState,
        completed: &HashMap<String, CompletedNode>,
        contributions: &mut HashMap<String, HashSet<String>>,
    ) -> Result<Vec<String>, EngineError> {
        let mut order: Vec<String> = completed.keys().cloned().collect();
        order.sort_by_key(|id| self.graph.registration_index(id));

        for id in &order {
            let update = &completed[id].update;
            let mut keys: Vec<&String> = update.keys().collect();
            keys.sort();
            for key in keys {
                if let Err(reason) = self.graph.schema.validate(key, &update[key]) {
                    return Err(EngineError::malformed_output(
                        id.clone(),
                        format!("field '{key}': {reason}"),
                    ));
                }
            }
            state.apply(update.clone());
        }

        for id in &order {
            let next = match &completed[id].next {
                Some(next) => {
                    let next = normalize(next.clone());
                    for target in next.targets() {
                        if !self.graph.has_node(target) {
                            return Err(GraphError::UnknownTarget {
                                from: id.clone(),
                                target: target.to_string(),
                            }
                            .into());
                        }
                    }
                    next
                }
                None => self.graph.edges.route_from(id, state, &ctx.config)?,
            };
            for target in next.targets() {
                contributions
                    .entry(target.to_string())
                    .or_default()
                    .insert(id.clone());
            }
        }

        self.ready_targets(contributions)
    }

    /// A target is ready once every declared predecessor has contributed or
    /// can no longer run. Liveness is judged by reachability from the other
    /// waiting targets, never through the target itself, so entering a loop
    /// does not wait on the target's own downstream nodes.
    fn ready_targets(
        &self,
        contributions: &mut HashMap<String, HashSet<String>>,
    ) -> Result<Vec<String>, EngineError> {
        let mut candidates: Vec<String> = contributions.keys().cloned().collect();
        candidates.sort_by_key(|id| self.graph.registration_index(id));

        let mut ready = Vec::new();
        for candidate in &candidates {
            let others = candidates.iter().filter(|other| *other != candidate);
            let live = self.graph.reachable_excluding(others, candidate);
            let satisfied = match self.graph.predecessors.get(candidate) {
                Some(preds) => preds
                    .iter()
                    .all(|pred| contributions[candidate].contains(pred) || !live.contains(pred)),
                None => true,
            };
            if satisfied {
                ready.push(candidate.clone());
            }
        }

        if ready.is_empty() && !candidates.is_empty() {
            return Err(GraphError::JoinDeadlock(candidates).into());
        }
        for id in &ready {
            contributions.remove(id);
        }
        Ok(ready)
    }

    async fn fail(&self, run_id: &RunId, err: EngineError) -> Result<RunOutcome, EngineError> {
        self.backend.delete(run_id).await?;
        log::error!("Run {run_id} failed: {err}");
        emit(
            &self.events,
            RunEvent::RunFailed {
                run_id: run_id.clone(),
                error: err.to_string(),
            },
        );
        Err(err)
    }
}
