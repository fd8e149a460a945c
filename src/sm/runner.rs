//! Drives a single state machine: one state body at a time, transitioning
//! per its declared [`Transition`] and an externally fed event queue.
//!
//! Mirrors the DAG runner's `Inner`-behind-`Arc` shape, but since only one
//! state runs at a time there is no per-node task fan-out: `step()` and
//! `send()` drive the machine directly on the caller's task.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::body::StateInput;
use super::definition::{ConditionContext, StateDescriptor, StateMachineDefinition, Transition};
use super::transition;
use crate::context::RunContext;
use crate::error::{Cancelled, NodeError, RunError, StateMachineValidationError};
use crate::event_bus::{Event, EventType, NodeStateData, TransitionData};
use crate::node::CancelProbe;
use crate::runnable::{completion_pair, CompletionRx, CompletionTx, RunOutcome, Runnable};
use crate::semaphore::SemaphoreRegistry;
use crate::types::{StepId, Value};

/// The machine-level status values from §4.7.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmStatus {
    Initial,
    Running,
    Ready,
    PendingSemaphore,
    WaitingForEvent,
    Final,
    Error,
    Cancelled,
}

/// The machine's current position: the active state name, what it was
/// entered from, the input it was (or will be) run with, the output its
/// body last produced, and the event that drove the last transition.
#[derive(Clone, Debug)]
pub struct CurrentState {
    pub state: String,
    pub previous_state: Option<String>,
    pub input: Value,
    pub output: Value,
    pub event: Option<String>,
}

/// An event to inject via [`StateMachineRunner::send`].
#[derive(Clone, Debug)]
pub struct SendEvent {
    pub event_type: String,
    pub data: Value,
    /// If no transition handler accepts this event right now, keep it
    /// queued for a later state rather than dropping it.
    pub queue: bool,
}

impl SendEvent {
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            queue: false,
        }
    }

    #[must_use]
    pub fn queued(mut self) -> Self {
        self.queue = true;
        self
    }
}

/// Options accepted by [`StateMachineRunner::build`] / [`run_state_machine`].
pub struct SmRunOptions<C> {
    pub ctx: RunContext,
    pub root_input: Value,
    pub context: Arc<C>,
    pub semaphores: Vec<Arc<SemaphoreRegistry>>,
}

impl<C> SmRunOptions<C> {
    pub fn new(ctx: RunContext, root_input: Value, context: C) -> Self {
        Self {
            ctx,
            root_input,
            context: Arc::new(context),
            semaphores: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SmRunError {
    #[error(transparent)]
    Validation(#[from] StateMachineValidationError),
    #[error(transparent)]
    Run(#[from] RunError),
}

struct StateMachineInner<C> {
    name: String,
    definition: StateMachineDefinition<C>,
    ctx: RunContext,
    user_context: Arc<C>,
    root_input: Value,
    semaphores: Vec<Arc<SemaphoreRegistry>>,
    status: Mutex<SmStatus>,
    current: Mutex<CurrentState>,
    step_index: Mutex<usize>,
    machine_step: Mutex<Option<StepId>>,
    event_queue: Mutex<VecDeque<SendEvent>>,
    cancel_token: CancellationToken,
    completion_tx: CompletionTx,
    completion_rx: CompletionRx,
}

impl<C> StateMachineInner<C>
where
    C: Send + Sync + 'static,
{
    fn descriptor(&self, state: &str) -> Option<&StateDescriptor<C>> {
        self.definition.nodes.get(state)
    }

    fn condition_context(&self, input: Value, output: Value, event: Option<String>) -> ConditionContext<C> {
        ConditionContext {
            context: Arc::clone(&self.user_context),
            input,
            output,
            event,
        }
    }

    fn has_unconditional_transition(descriptor: &StateDescriptor<C>) -> bool {
        match &descriptor.transition {
            Some(Transition::Unconditional(_)) => true,
            Some(Transition::Keyed(map)) => map.contains_key(""),
            None => false,
        }
    }

    fn can_step(&self) -> bool {
        let status = *self.status.lock();
        if matches!(
            status,
            SmStatus::Running | SmStatus::Cancelled | SmStatus::WaitingForEvent | SmStatus::Final
        ) {
            return false;
        }
        let state = self.current.lock().state.clone();
        let Some(descriptor) = self.descriptor(&state) else {
            return false;
        };
        descriptor.run.is_some() || Self::has_unconditional_transition(descriptor)
    }

    fn available_events(&self) -> Vec<String> {
        let state = self.current.lock().state.clone();
        self.descriptor(&state).map(transition::available_events).unwrap_or_default()
    }

    /// Scan the queued events for one the current state can act on (§4.7
    /// "queue drain"). Mutates the queue in place; returns the event type
    /// (if any) and target state of the first fired transition.
    fn drain_event_queue(&self, descriptor: &StateDescriptor<C>, output: &Value) -> Option<(Option<String>, String)> {
        let items: Vec<SendEvent> = self.event_queue.lock().drain(..).collect();
        let input = self.current.lock().input.clone();
        let mut fired = None;
        let mut retained = VecDeque::new();

        for item in items {
            if fired.is_some() {
                if item.queue {
                    retained.push_back(item);
                }
                continue;
            }
            let cctx = self.condition_context(input.clone(), output.clone(), Some(item.event_type.clone()));
            if let Some(target) = transition::resolve(descriptor, &item.event_type, &cctx) {
                fired = Some((Some(item.event_type), target));
            } else {
                let has_handler = transition::available_events(descriptor).contains(&item.event_type);
                if item.queue && !has_handler {
                    retained.push_back(item);
                }
            }
        }

        *self.event_queue.lock() = retained;
        fired
    }

    /// One transition attempt (§4.7 `step()`). `Ok(true)` if the machine
    /// advanced (to `ready` or `final`); `Ok(false)` if it was already
    /// terminal/cancelled, or cancellation was observed; `Err` if the
    /// state's body failed and the error is re-raised after recording it.
    async fn step(&self) -> Result<bool, NodeError> {
        {
            let status = *self.status.lock();
            if matches!(status, SmStatus::Final | SmStatus::Error | SmStatus::Cancelled) {
                return Ok(false);
            }
        }

        if matches!(*self.status.lock(), SmStatus::Initial) {
            let machine_step = StepId::new();
            *self.machine_step.lock() = Some(machine_step);
            let _ = self.ctx.log_event(Event {
                event_type: EventType::StateMachineStart,
                run_id: Some(self.ctx.run_id()),
                step: Some(machine_step),
                source: self.name.clone(),
                source_node: String::new(),
                start_time: Some(chrono::Utc::now()),
                end_time: None,
                data: json!({
                    "input": self.root_input,
                    "parent_step": self.ctx.parent_step(),
                }),
                meta: None,
            });
        }
        *self.status.lock() = SmStatus::Running;

        *self.step_index.lock() += 1;

        let state_name = self.current.lock().state.clone();
        let Some(descriptor) = self.descriptor(&state_name) else {
            return Ok(false);
        };

        let mut releaser = None;
        if let Some(key) = &descriptor.semaphore_key {
            if !self.semaphores.is_empty() {
                *self.status.lock() = SmStatus::PendingSemaphore;
                match crate::semaphore::acquire_semaphores(&self.semaphores, key, &self.cancel_token).await {
                    Ok(r) => releaser = Some(r),
                    Err(_) => {
                        self.finish_cancelled();
                        return Ok(false);
                    }
                }
                *self.status.lock() = SmStatus::Running;
            }
        }

        let node_step = StepId::new();
        let child_ctx = self.ctx.child(node_step);
        let (input, event, previous_state) = {
            let current = self.current.lock();
            (current.input.clone(), current.event.clone(), current.previous_state.clone())
        };

        let _ = child_ctx.log_event(Event {
            event_type: EventType::StateMachineNodeStart,
            run_id: Some(self.ctx.run_id()),
            step: Some(node_step),
            source: self.name.clone(),
            source_node: state_name.clone(),
            start_time: Some(chrono::Utc::now()),
            end_time: None,
            data: json!({
                "input": input,
                "event": event,
                "parent_step": self.machine_step.lock().clone(),
            }),
            meta: None,
        });

        let body_result = if let Some(body) = &descriptor.run {
            let state_input = StateInput {
                ctx: child_ctx.clone(),
                context: Arc::clone(&self.user_context),
                input: input.clone(),
                root_input: self.root_input.clone(),
                event: event.clone(),
                previous_state,
                span: tracing::Span::current(),
                cancel: CancelProbe::new(self.cancel_token.clone()),
            };
            Some(body.run(state_input).await)
        } else {
            None
        };

        if let Some(releaser) = releaser.as_mut() {
            releaser.release_all();
        }

        if self.cancel_token.is_cancelled() {
            self.finish_cancelled();
            return Ok(false);
        }

        let output = match body_result {
            None => input.clone(),
            Some(Ok(value)) => {
                let _ = child_ctx.log_event(Event {
                    event_type: EventType::StateMachineNodeFinish,
                    run_id: Some(self.ctx.run_id()),
                    step: Some(node_step),
                    source: self.name.clone(),
                    source_node: state_name.clone(),
                    start_time: None,
                    end_time: Some(chrono::Utc::now()),
                    data: json!({ "output": value }),
                    meta: None,
                });
                value
            }
            Some(Err(err)) => {
                if err.downcast_ref::<Cancelled>().is_some() {
                    self.finish_cancelled();
                    return Ok(false);
                }
                return Err(self.handle_body_error(&state_name, descriptor, err, &child_ctx, node_step));
            }
        };
        self.current.lock().output = output.clone();

        let fired = self.drain_event_queue(descriptor, &output).or_else(|| {
            let cctx = self.condition_context(input.clone(), output.clone(), None);
            transition::resolve(descriptor, "", &cctx).map(|target| (None, target))
        });

        match fired {
            Some((event_type, target)) => {
                self.apply_transition(&child_ctx, node_step, &state_name, &target, input, output, event_type);
                Ok(true)
            }
            None => {
                *self.status.lock() = SmStatus::WaitingForEvent;
                Ok(true)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_transition(
        &self,
        child_ctx: &RunContext,
        node_step: StepId,
        from: &str,
        target: &str,
        input: Value,
        output: Value,
        event_type: Option<String>,
    ) {
        let is_final = self.descriptor(target).map(|d| d.is_final).unwrap_or(false);

        let _ = child_ctx.log_event(Event {
            event_type: EventType::StateMachineTransition,
            run_id: Some(self.ctx.run_id()),
            step: Some(node_step),
            source: self.name.clone(),
            source_node: from.to_string(),
            start_time: None,
            end_time: Some(chrono::Utc::now()),
            data: serde_json::to_value(TransitionData {
                from: from.to_string(),
                to: target.to_string(),
                input,
                output: output.clone(),
                event: event_type.clone(),
                r#final: is_final,
            })
            .unwrap_or(Value::Null),
            meta: None,
        });

        {
            let mut current = self.current.lock();
            current.previous_state = Some(from.to_string());
            current.state = target.to_string();
            current.input = output.clone();
            current.output = Value::Null;
            current.event = event_type;
        }

        *self.status.lock() = if is_final { SmStatus::Final } else { SmStatus::Ready };
        if is_final {
            self.completion_tx.complete(Ok(output));
        }
    }

    fn handle_body_error(
        &self,
        state_name: &str,
        descriptor: &StateDescriptor<C>,
        err: crate::error::BodyError,
        child_ctx: &RunContext,
        node_step: StepId,
    ) -> NodeError {
        let node_error = NodeError::new(state_name, &err);
        let error_state = descriptor
            .error_state
            .clone()
            .or_else(|| self.definition.error_state.clone());
        if let Some(target) = error_state {
            let mut current = self.current.lock();
            current.previous_state = Some(state_name.to_string());
            current.state = target;
            current.input = json!({ "error": node_error.message.clone() });
            current.event = None;
        }
        *self.status.lock() = SmStatus::Error;
        let _ = child_ctx.log_event(Event {
            event_type: EventType::StateMachineError,
            run_id: Some(self.ctx.run_id()),
            step: Some(node_step),
            source: self.name.clone(),
            source_node: state_name.to_string(),
            start_time: None,
            end_time: Some(chrono::Utc::now()),
            data: json!({ "error": node_error.message }),
            meta: None,
        });
        self.completion_tx.complete(Err(RunError::Node(node_error.clone())));
        node_error
    }

    /// Step to quiescence: keep stepping while the machine keeps advancing
    /// (`ready`); stop on `waiting_for_event`, `final`, `error`, or
    /// `cancelled`.
    async fn run_loop(&self) {
        loop {
            match self.step().await {
                Ok(true) => {
                    if !matches!(*self.status.lock(), SmStatus::Ready) {
                        break;
                    }
                }
                Ok(false) | Err(_) => break,
            }
        }
    }

    /// Inject an event per §4.7's queueing rules, driving the machine to
    /// quiescence again if it fires an immediate, non-final transition.
    async fn send(&self, event: SendEvent) {
        let status = *self.status.lock();
        let state_name = self.current.lock().state.clone();
        let descriptor = self.descriptor(&state_name);
        let has_handler = descriptor
            .map(|d| transition::available_events(d).contains(&event.event_type))
            .unwrap_or(false);

        let should_queue = matches!(status, SmStatus::Running) || (event.queue && !has_handler);
        if should_queue {
            self.event_queue.lock().push_back(event);
            return;
        }

        let Some(descriptor) = descriptor else {
            return;
        };
        let (input, output) = {
            let current = self.current.lock();
            (current.input.clone(), current.output.clone())
        };
        let cctx = self.condition_context(input.clone(), output.clone(), Some(event.event_type.clone()));
        let Some(target) = transition::resolve(descriptor, &event.event_type, &cctx) else {
            return;
        };

        let node_step = StepId::new();
        let child_ctx = self.ctx.child(node_step);
        self.apply_transition(
            &child_ctx,
            node_step,
            &state_name,
            &target,
            input,
            output,
            Some(event.event_type),
        );

        if matches!(*self.status.lock(), SmStatus::Ready) {
            self.run_loop().await;
        }
    }

    fn finish_cancelled(&self) {
        let mut status = self.status.lock();
        if matches!(*status, SmStatus::Final | SmStatus::Error | SmStatus::Cancelled) {
            return;
        }
        *status = SmStatus::Cancelled;
        drop(status);

        let _ = self.ctx.log_event(Event {
            event_type: EventType::StateMachineStatus,
            run_id: Some(self.ctx.run_id()),
            step: *self.machine_step.lock(),
            source: self.name.clone(),
            source_node: String::new(),
            start_time: None,
            end_time: None,
            data: serde_json::to_value(NodeStateData {
                state: "cancelled".to_string(),
            })
            .unwrap_or(Value::Null),
            meta: None,
        });
        self.completion_tx.complete(Err(RunError::Cancelled));
    }

    fn cancel(&self) {
        self.cancel_token.cancel();
        self.finish_cancelled();
    }
}

/// Runs a single [`StateMachineDefinition`] to completion (or cancellation).
pub struct StateMachineRunner<C> {
    inner: Arc<StateMachineInner<C>>,
    started: AtomicBool,
}

impl<C> StateMachineRunner<C>
where
    C: Send + Sync + 'static,
{
    pub fn build(definition: StateMachineDefinition<C>, options: SmRunOptions<C>) -> Result<Self, StateMachineValidationError> {
        definition.validate()?;

        let sm_step = StepId::new();
        let ctx = options.ctx.child(sm_step);
        let current = CurrentState {
            state: definition.initial.clone(),
            previous_state: None,
            input: options.root_input.clone(),
            output: Value::Null,
            event: None,
        };
        let (completion_tx, completion_rx) = completion_pair();

        let inner = Arc::new(StateMachineInner {
            name: definition.name.clone(),
            definition,
            ctx,
            user_context: options.context,
            root_input: options.root_input,
            semaphores: options.semaphores,
            status: Mutex::new(SmStatus::Initial),
            current: Mutex::new(current),
            step_index: Mutex::new(0),
            machine_step: Mutex::new(None),
            event_queue: Mutex::new(VecDeque::new()),
            cancel_token: CancellationToken::new(),
            completion_tx,
            completion_rx,
        });

        Ok(Self {
            inner,
            started: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// One transition attempt; see §4.7.
    pub async fn step(&self) -> Result<bool, NodeError> {
        self.inner.step().await
    }

    #[must_use]
    pub fn can_step(&self) -> bool {
        self.inner.can_step()
    }

    /// Event types the current state declares transitions for (the empty
    /// "always" key excluded).
    #[must_use]
    pub fn available_events(&self) -> Vec<String> {
        self.inner.available_events()
    }

    pub async fn send(&self, event: SendEvent) {
        self.inner.send(event).await;
    }

    #[must_use]
    pub fn current_state(&self) -> CurrentState {
        self.inner.current.lock().clone()
    }

    #[must_use]
    pub fn status(&self) -> SmStatus {
        *self.inner.status.lock()
    }
}

#[async_trait]
impl<C> Runnable for StateMachineRunner<C>
where
    C: Send + Sync + 'static,
{
    async fn run(&self) -> Result<(), RunError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run_loop().await;
        });
        Ok(())
    }

    async fn finished(&self) -> RunOutcome {
        let mut rx = self.inner.completion_rx.clone();
        rx.wait().await
    }

    fn cancel(&self) {
        self.inner.cancel();
    }
}

/// Build, run, and await a state machine in one call.
pub async fn run_state_machine<C>(
    definition: StateMachineDefinition<C>,
    options: SmRunOptions<C>,
) -> Result<Value, SmRunError>
where
    C: Send + Sync + 'static,
{
    let runner = StateMachineRunner::build(definition, options)?;
    runner.run().await?;
    Ok(runner.finished().await?)
}
