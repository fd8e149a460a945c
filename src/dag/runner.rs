//! Orchestrates a whole DAG: builds one [`NodeRunner`] per node plus a
//! synthetic `__output` collector, wires parent→child completion watching,
//! and implements [`Runnable`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::json;
use thiserror::Error;

use super::compiler::compile;
use super::definition::{DagDefinition, NodeDescriptor};
use super::node_runner::NodeRunner;
use crate::cache::ResultCache;
use crate::context::RunContext;
use crate::error::{DagCompileError, NodeError, RunError};
use crate::event_bus::{Event, EventType};
use crate::node::node_fn;
use crate::runnable::{completion_pair, CompletionRx, CompletionTx, RunOutcome, Runnable};
use crate::semaphore::SemaphoreRegistry;
use crate::types::{StepId, Value};

/// Options accepted by [`DagRunner::build`] / [`run_dag`].
pub struct DagRunOptions<C> {
    /// Context this DAG nests under; a fresh step is allocated as its child.
    pub ctx: RunContext,
    pub root_input: Value,
    pub context: Arc<C>,
    pub cache: Option<Arc<dyn ResultCache>>,
    pub semaphores: Vec<Arc<SemaphoreRegistry>>,
    /// Whether newly-ready nodes dispatch immediately (`true`, the default)
    /// or wait for an explicit external `run()` call per node.
    pub autorun: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl<C> DagRunOptions<C> {
    pub fn new(ctx: RunContext, root_input: Value, context: C) -> Self {
        Self {
            ctx,
            root_input,
            context: Arc::new(context),
            cache: None,
            semaphores: Vec::new(),
            autorun: Arc::new(|| true),
        }
    }
}

/// Errors from building or awaiting a DAG run: construction-time compile
/// errors are kept distinct from runtime node/cancellation errors.
#[derive(Debug, Error)]
pub enum DagRunError {
    #[error(transparent)]
    Compile(#[from] DagCompileError),
    #[error(transparent)]
    Run(#[from] RunError),
}

pub(super) struct DagRunnerInner<C> {
    pub name: String,
    pub ctx: RunContext,
    pub autorun: Arc<dyn Fn() -> bool + Send + Sync>,
    pub semaphores: Vec<Arc<SemaphoreRegistry>>,
    pub cache: Option<Arc<dyn ResultCache>>,
    pub user_context: Arc<C>,
    pub root_input: Value,
    pub tolerate_failures: bool,
    pub dag_step: StepId,
    nodes: FxHashMap<String, Arc<NodeRunner<C>>>,
    output: Arc<NodeRunner<C>>,
    first_error: Mutex<Option<NodeError>>,
    dag_completion_tx: CompletionTx,
    dag_completion_rx: CompletionRx,
}

impl<C> DagRunnerInner<C>
where
    C: Send + Sync + 'static,
{
    pub(super) fn on_node_error(self: &Arc<Self>, error: NodeError) {
        if self.tolerate_failures {
            return;
        }
        let mut first = self.first_error.lock();
        if first.is_some() {
            return;
        }
        *first = Some(error.clone());
        drop(first);

        let _ = self.ctx.log_event(Event {
            event_type: EventType::DagError,
            run_id: Some(self.ctx.run_id()),
            step: Some(self.dag_step),
            source: self.name.clone(),
            source_node: error.source_node.clone(),
            start_time: None,
            end_time: Some(chrono::Utc::now()),
            data: json!({ "error": error.message }),
            meta: None,
        });

        self.dag_completion_tx.complete(Err(RunError::Node(error)));

        for node in self.nodes.values() {
            node.cancel(self);
        }
        self.output.cancel(self);
    }
}

/// Runs a compiled DAG to completion.
pub struct DagRunner<C> {
    inner: Arc<DagRunnerInner<C>>,
    started: AtomicBool,
}

impl<C> DagRunner<C>
where
    C: Send + Sync + 'static,
{
    /// Compile `definition` and construct every node runner plus the
    /// synthetic `__output` collector. Does not start execution; call
    /// [`Runnable::run`] for that.
    pub fn build(definition: DagDefinition<C>, options: DagRunOptions<C>) -> Result<Self, DagCompileError> {
        let compiled = compile(&definition.nodes)?;

        let dag_step = StepId::new();
        let ctx = options.ctx.child(dag_step);

        let nodes: FxHashMap<String, Arc<NodeRunner<C>>> = definition
            .nodes
            .into_iter()
            .map(|(name, descriptor)| {
                let runner = NodeRunner::new(name.clone(), descriptor);
                (name, runner)
            })
            .collect();

        let leaf_set = compiled.leaf_set.clone();
        let output_descriptor = NodeDescriptor::new(node_fn(move |input| async move {
            if input.input.len() == 1 {
                Ok(input.input.values().next().cloned().unwrap_or(Value::Null))
            } else {
                let map: serde_json::Map<String, Value> =
                    input.input.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                Ok(Value::Object(map))
            }
        }))
        .parents(leaf_set)
        .tolerate_parent_errors(true);
        let output = NodeRunner::new_synthetic("__output".to_string(), output_descriptor);

        let (dag_completion_tx, dag_completion_rx) = completion_pair();

        let inner = Arc::new(DagRunnerInner {
            name: definition.name,
            ctx,
            autorun: options.autorun,
            semaphores: options.semaphores,
            cache: options.cache,
            user_context: options.context,
            root_input: options.root_input,
            tolerate_failures: definition.tolerate_failures,
            dag_step,
            nodes,
            output,
            first_error: Mutex::new(None),
            dag_completion_tx,
            dag_completion_rx,
        });

        for node in inner.nodes.values() {
            spawn_parent_watcher(Arc::clone(node), &inner);
        }
        spawn_parent_watcher(Arc::clone(&inner.output), &inner);
        spawn_output_watcher(&inner);

        Ok(Self {
            inner,
            started: AtomicBool::new(false),
        })
    }

    /// The DAG's name, as declared on its [`DagDefinition`].
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

fn spawn_parent_watcher<C>(node: Arc<NodeRunner<C>>, inner: &Arc<DagRunnerInner<C>>)
where
    C: Send + Sync + 'static,
{
    let parent_names = node.parents().to_vec();
    if parent_names.is_empty() {
        return;
    }
    let parent_rxs: Vec<(String, CompletionRx)> = parent_names
        .into_iter()
        .filter_map(|name| inner.nodes.get(&name).map(|p| (name, p.completion_rx())))
        .collect();
    let inner = Arc::clone(inner);

    tokio::spawn(async move {
        let mut pending = FuturesUnordered::new();
        for (name, mut rx) in parent_rxs {
            pending.push(async move {
                let outcome = rx.wait().await;
                (name, outcome)
            });
        }
        while let Some((name, outcome)) = pending.next().await {
            node.on_parent_outcome(&name, outcome, &inner).await;
        }
    });
}

fn spawn_output_watcher<C>(inner: &Arc<DagRunnerInner<C>>)
where
    C: Send + Sync + 'static,
{
    let mut rx = inner.output.completion_rx();
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let outcome = rx.wait().await;
        match outcome {
            Ok(value) => {
                inner.dag_completion_tx.complete(Ok(value.clone()));
                let _ = inner.ctx.log_event(Event {
                    event_type: EventType::DagFinish,
                    run_id: Some(inner.ctx.run_id()),
                    step: Some(inner.dag_step),
                    source: inner.name.clone(),
                    source_node: String::new(),
                    start_time: None,
                    end_time: Some(chrono::Utc::now()),
                    data: json!({ "output": value }),
                    meta: None,
                });
            }
            Err(err) => {
                inner.dag_completion_tx.complete(Err(err));
                for node in inner.nodes.values() {
                    node.cancel(&inner);
                }
            }
        }
    });
}

#[async_trait]
impl<C> Runnable for DagRunner<C>
where
    C: Send + Sync + 'static,
{
    async fn run(&self) -> Result<(), RunError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let _ = self.inner.ctx.log_event(Event {
            event_type: EventType::DagStart,
            run_id: Some(self.inner.ctx.run_id()),
            step: Some(self.inner.dag_step),
            source: self.inner.name.clone(),
            source_node: String::new(),
            start_time: Some(chrono::Utc::now()),
            end_time: None,
            data: json!({
                "input": self.inner.root_input,
                "parent_step": self.inner.ctx.parent_step(),
            }),
            meta: None,
        });

        if (self.inner.autorun)() {
            for node in self.inner.nodes.values() {
                let node = Arc::clone(node);
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    node.run(&inner).await;
                });
            }
        }

        Ok(())
    }

    async fn finished(&self) -> RunOutcome {
        let mut rx = self.inner.dag_completion_rx.clone();
        rx.wait().await
    }

    fn cancel(&self) {
        for node in self.inner.nodes.values() {
            node.cancel(&self.inner);
        }
        self.inner.output.cancel(&self.inner);
    }
}

/// Compile, build, run, and await a DAG in one call (§4.6's resolved open
/// question: the public helper awaits `finished` rather than returning once
/// scheduling starts).
pub async fn run_dag<C>(
    definition: DagDefinition<C>,
    options: DagRunOptions<C>,
) -> Result<Value, DagRunError>
where
    C: Send + Sync + 'static,
{
    let runner = DagRunner::build(definition, options)?;
    runner.run().await?;
    Ok(runner.finished().await?)
}
