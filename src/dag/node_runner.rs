//! A single DAG node's lifecycle: waiting for parents, acquiring its
//! semaphore, running its body (or serving a cache hit), and notifying
//! subscribers of its outcome.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::definition::NodeDescriptor;
use super::runner::DagRunnerInner;
use crate::cache::cache_key;
use crate::error::{Cancelled, NodeError, RunError};
use crate::event_bus::{Event, EventType, NodeStateData};
use crate::node::{CancelProbe, NodeInput};
use crate::runnable::{completion_pair, CompletionRx, CompletionTx, RunOutcome};
use crate::types::{StepId, Value};

/// The node lifecycle states from §3, renamed to `snake_case` idents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Waiting,
    Ready,
    PendingSemaphore,
    Running,
    Finished,
    Error,
    Cancelled,
}

impl NodeState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Cancelled)
    }
}

pub struct NodeRunner<C> {
    pub(super) name: String,
    descriptor: NodeDescriptor<C>,
    /// True only for the runner-internal `__output` collector: it never
    /// emits `dag:node_start`/`dag:node_finish`/`dag:node_error` — those are
    /// reserved for author-declared nodes (§8 Scenario A counts exactly the
    /// declared nodes). Its completion still drives `dag:finish`/`dag:error`
    /// via the DAG runner's output watcher.
    synthetic: bool,
    state: Mutex<NodeState>,
    waiting: Mutex<FxHashSet<String>>,
    inputs: Mutex<FxHashMap<String, Value>>,
    cancel_token: CancellationToken,
    completion_tx: CompletionTx,
    completion_rx: CompletionRx,
}

impl<C> NodeRunner<C>
where
    C: Send + Sync + 'static,
{
    pub(super) fn new(name: String, descriptor: NodeDescriptor<C>) -> Arc<Self> {
        Self::build(name, descriptor, false)
    }

    pub(super) fn new_synthetic(name: String, descriptor: NodeDescriptor<C>) -> Arc<Self> {
        Self::build(name, descriptor, true)
    }

    fn build(name: String, descriptor: NodeDescriptor<C>, synthetic: bool) -> Arc<Self> {
        let waiting = descriptor.parents.iter().cloned().collect();
        let (completion_tx, completion_rx) = completion_pair();
        Arc::new(Self {
            name,
            descriptor,
            synthetic,
            state: Mutex::new(NodeState::Waiting),
            waiting: Mutex::new(waiting),
            inputs: Mutex::new(FxHashMap::default()),
            cancel_token: CancellationToken::new(),
            completion_tx,
            completion_rx,
        })
    }

    pub(super) fn state(&self) -> NodeState {
        *self.state.lock()
    }

    pub(super) fn completion_rx(&self) -> CompletionRx {
        self.completion_rx.clone()
    }

    pub(super) fn parents(&self) -> &[String] {
        &self.descriptor.parents
    }

    fn ready_to_resume(&self) -> bool {
        self.waiting.lock().is_empty() && matches!(*self.state.lock(), NodeState::Waiting | NodeState::Ready)
    }

    /// Manual invocation (§4.5 step 3): dispatch if not waiting and not
    /// already running/terminal. Returns whether it actually dispatched.
    pub(super) async fn run(self: &Arc<Self>, dag: &Arc<DagRunnerInner<C>>) -> bool {
        if !self.ready_to_resume() {
            return false;
        }
        self.dispatch(dag).await;
        true
    }

    /// Invoked once per declared parent, as that parent's completion
    /// resolves. Implements §4.5's "one-shot subscription" reactions.
    pub(super) async fn on_parent_outcome(
        self: &Arc<Self>,
        parent_name: &str,
        outcome: RunOutcome,
        dag: &Arc<DagRunnerInner<C>>,
    ) {
        self.waiting.lock().remove(parent_name);
        match outcome {
            Ok(value) => {
                self.inputs.lock().insert(parent_name.to_string(), value);
                self.attempt_run_triggered(dag).await;
            }
            Err(_) => {
                if self.descriptor.tolerate_parent_errors {
                    self.inputs.lock().insert(parent_name.to_string(), Value::Null);
                    self.attempt_run_triggered(dag).await;
                } else {
                    self.cancel(dag);
                }
            }
        }
    }

    async fn attempt_run_triggered(self: &Arc<Self>, dag: &Arc<DagRunnerInner<C>>) {
        {
            let waiting_empty = self.waiting.lock().is_empty();
            let state = *self.state.lock();
            if !waiting_empty || state.is_terminal() || matches!(state, NodeState::Running | NodeState::PendingSemaphore) {
                return;
            }
        }
        if !(dag.autorun)() {
            *self.state.lock() = NodeState::Ready;
            return;
        }
        self.dispatch(dag).await;
    }

    /// Request cancellation. Waiting/ready nodes transition to `cancelled`
    /// immediately (the monotonic exception in §3); a running node's body
    /// observes the token cooperatively and `dispatch` finalises the
    /// transition once it returns (§4.5 step 9).
    pub(super) fn cancel(self: &Arc<Self>, dag: &Arc<DagRunnerInner<C>>) {
        self.cancel_token.cancel();
        let mut state = self.state.lock();
        if matches!(*state, NodeState::Waiting | NodeState::Ready) {
            *state = NodeState::Cancelled;
            drop(state);
            self.emit_cancelled_state(dag);
            self.completion_tx.complete(Err(RunError::Cancelled));
        }
    }

    fn emit_cancelled_state(&self, dag: &Arc<DagRunnerInner<C>>) {
        let _ = dag.ctx.log_event(Event {
            event_type: EventType::DagNodeState,
            run_id: None,
            step: None,
            source: dag.name.clone(),
            source_node: self.name.clone(),
            start_time: None,
            end_time: None,
            data: serde_json::to_value(NodeStateData {
                state: "cancelled".to_string(),
            })
            .unwrap_or(Value::Null),
            meta: None,
        });
    }

    async fn dispatch(self: &Arc<Self>, dag: &Arc<DagRunnerInner<C>>) {
        *self.state.lock() = NodeState::PendingSemaphore;

        let mut releaser = None;
        if let Some(key) = &self.descriptor.semaphore_key {
            if !dag.semaphores.is_empty() {
                match crate::semaphore::acquire_semaphores(&dag.semaphores, key, &self.cancel_token).await {
                    Ok(r) => releaser = Some(r),
                    Err(_) => {
                        self.finish_cancelled(dag);
                        return;
                    }
                }
            }
        }

        *self.state.lock() = NodeState::Running;

        let step = StepId::new();
        let child_ctx = dag.ctx.child(step);
        let inputs_snapshot = self.inputs.lock().clone();
        let root_input = dag.root_input.clone();

        if !self.synthetic {
            let _ = child_ctx.log_event(Event {
                event_type: EventType::DagNodeStart,
                run_id: Some(dag.ctx.run_id()),
                step: Some(step),
                source: dag.name.clone(),
                source_node: self.name.clone(),
                start_time: Some(chrono::Utc::now()),
                end_time: None,
                data: json!({
                    "input": inputs_snapshot,
                    "parent_step": dag.ctx.current_step(),
                }),
                meta: None,
            });
        }

        let inputs_value = Value::Object(
            inputs_snapshot
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<serde_json::Map<String, Value>>(),
        );
        let cache_key_str = cache_key(&self.descriptor.body_version, &inputs_value, &root_input);

        let mut from_cache = false;
        let mut cached_output = None;
        if !self.synthetic {
            if let Some(cache) = &dag.cache {
                if let Ok(Some(raw)) = cache.get(&self.name, &cache_key_str).await {
                    if let Ok(value) = serde_json::from_str::<Value>(&raw) {
                        cached_output = Some(value);
                        from_cache = true;
                    }
                }
            }
        }

        let body_result = if let Some(value) = cached_output.take() {
            Ok(value)
        } else {
            let node_input = NodeInput {
                ctx: child_ctx.clone(),
                context: Arc::clone(&dag.user_context),
                input: inputs_snapshot,
                root_input,
                span: tracing::Span::current(),
                cancel: CancelProbe::new(self.cancel_token.clone()),
            };
            self.descriptor.body.run(node_input).await
        };

        if let Some(releaser) = releaser.as_mut() {
            releaser.release_all();
        }

        if self.cancel_token.is_cancelled() {
            self.finish_cancelled(dag);
            return;
        }

        match body_result {
            Ok(value) => {
                if !from_cache && !self.synthetic {
                    if let Some(cache) = &dag.cache {
                        let _ = cache
                            .set(&self.name, &cache_key_str, serde_json::to_string(&value).unwrap_or_default())
                            .await;
                    }
                }
                if !self.synthetic {
                    let _ = child_ctx.log_event(Event {
                        event_type: EventType::DagNodeFinish,
                        run_id: Some(dag.ctx.run_id()),
                        step: Some(step),
                        source: dag.name.clone(),
                        source_node: self.name.clone(),
                        start_time: None,
                        end_time: Some(chrono::Utc::now()),
                        data: json!({ "output": value }),
                        meta: None,
                    });
                }
                *self.state.lock() = NodeState::Finished;
                self.completion_tx.complete(Ok(value));
            }
            Err(err) => {
                if err.downcast_ref::<Cancelled>().is_some() {
                    self.finish_cancelled(dag);
                    return;
                }
                let node_error = NodeError::new(&self.name, &err);
                if !self.synthetic {
                    let _ = child_ctx.log_event(Event {
                        event_type: EventType::DagNodeError,
                        run_id: Some(dag.ctx.run_id()),
                        step: Some(step),
                        source: dag.name.clone(),
                        source_node: self.name.clone(),
                        start_time: None,
                        end_time: Some(chrono::Utc::now()),
                        data: json!({ "error": node_error.message.clone() }),
                        meta: None,
                    });
                }
                *self.state.lock() = NodeState::Error;
                self.completion_tx.complete(Err(RunError::Node(node_error.clone())));
                dag.on_node_error(node_error);
            }
        }
    }

    fn finish_cancelled(self: &Arc<Self>, dag: &Arc<DagRunnerInner<C>>) {
        let mut state = self.state.lock();
        if !state.is_terminal() {
            *state = NodeState::Cancelled;
            drop(state);
            self.emit_cancelled_state(dag);
            self.completion_tx.complete(Err(RunError::Cancelled));
        }
    }
}
