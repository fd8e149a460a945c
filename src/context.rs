//! The `RunContext` substrate: causally-linked run/step identifiers threaded
//! explicitly through user code (see the design notes on ambient state in
//! `SPEC_FULL.md` §9 — this crate picks the explicit-parameter style since
//! `tokio::spawn` does not propagate task-locals to spawned children).

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Map;
use tracing::instrument;

use crate::event_bus::{EmitterError, Event, EventEmitter, EventType, StepEndData, StepStartData};
use crate::types::{RunId, StepId, Value};

/// Options for establishing a fresh run.
pub struct StartRunOptions {
    /// Human name of the enclosing workflow (DAG or state machine).
    pub source_name: String,
    /// Sink events are published to; back-filled with `run_id`/`step` by
    /// [`RunContext::log_event`] before dispatch.
    pub sink: Arc<dyn EventEmitter>,
    /// Supply to resume a previously-known run id ("revival"); otherwise a
    /// fresh UUIDv7 is allocated.
    pub run_id: Option<RunId>,
}

/// Options for entering a child step.
#[derive(Default, Clone)]
pub struct StepOptions {
    /// Explicit step name; defaults to the node/state name at call sites
    /// that already know it.
    pub name: Option<String>,
    /// Node name this step is attributed to, for `source_node` on events.
    /// Falls back to `name` when unset.
    pub source_node: Option<String>,
    /// Free-form tags merged into the `*_start` event.
    pub tags: Option<Value>,
    /// The call's argument(s), recorded as `StepStartData.input`.
    pub input: Option<Value>,
    /// Suppress `step:start`/`step:end`/`step:error` emission for this step.
    pub skip_logging: bool,
}

struct Inner {
    run_id: RunId,
    source_name: String,
    parent_step: Option<StepId>,
    current_step: Option<StepId>,
    sink: Arc<dyn EventEmitter>,
    /// Metadata a step body can attach via `record_step_info`, merged into
    /// that step's terminal event.
    info: Mutex<Map<String, Value>>,
}

/// A cheaply-cloned handle carrying the ambient run/step identity.
///
/// Cloning shares the same `run_id` and event sink; `run_step` produces a
/// *new* `RunContext` value (not a clone) with a freshly allocated
/// `current_step` and `parent_step` set to the caller's `current_step`.
#[derive(Clone)]
pub struct RunContext(Arc<Inner>);

impl RunContext {
    /// Establish a fresh run context with a newly allocated `run_id` (or the
    /// supplied one, for revival).
    #[must_use]
    pub fn start_run(options: StartRunOptions) -> Self {
        let run_id = options.run_id.unwrap_or_default();
        Self(Arc::new(Inner {
            run_id,
            source_name: options.source_name,
            parent_step: None,
            current_step: None,
            sink: options.sink,
            info: Mutex::new(Map::new()),
        }))
    }

    pub fn run_id(&self) -> RunId {
        self.0.run_id
    }

    pub fn source_name(&self) -> &str {
        &self.0.source_name
    }

    pub fn parent_step(&self) -> Option<StepId> {
        self.0.parent_step
    }

    pub fn current_step(&self) -> Option<StepId> {
        self.0.current_step
    }

    /// Publish an event, back-filling `run_id`/`step` from this context if
    /// absent so that a sink never observes an event without a `run_id`.
    pub fn log_event(&self, mut event: Event) -> Result<(), EmitterError> {
        if event.run_id.is_none() {
            event.run_id = Some(self.0.run_id);
        }
        if event.step.is_none() {
            event.step = self.0.current_step;
        }
        self.0.sink.emit(event)
    }

    /// Attach metadata to the *current* step's terminal event, from within
    /// that step's body.
    pub fn record_step_info(&self, info: Map<String, Value>) {
        self.0.info.lock().extend(info);
    }

    /// Derive a child context for a new step, without emitting events.
    /// Used by callers (DAG/SM runners) that need the forked context ahead
    /// of invoking [`RunContext::run_step`] machinery manually.
    pub(crate) fn child(&self, step: StepId) -> Self {
        Self(Arc::new(Inner {
            run_id: self.0.run_id,
            source_name: self.0.source_name.clone(),
            parent_step: self.0.current_step,
            current_step: Some(step),
            sink: Arc::clone(&self.0.sink),
            info: Mutex::new(Map::new()),
        }))
    }

    /// Allocate a child step id, set `parent_step` to the outer
    /// `current_step`, and run `body` with that ambient context. Emits
    /// `step:start` before the body and exactly one of `step:end` /
    /// `step:error` on return, unless `skip_logging` is set.
    #[instrument(skip_all, fields(run_id = %self.run_id(), step_name = options.name.as_deref().unwrap_or("step")))]
    pub async fn run_step<F, Fut, T>(&self, options: StepOptions, body: F) -> Result<T, crate::error::BodyError>
    where
        F: FnOnce(RunContext) -> Fut,
        Fut: Future<Output = Result<T, crate::error::BodyError>>,
        T: Serialize + Clone,
    {
        let step = StepId::new();
        let child_ctx = self.child(step);
        let source_node = options
            .source_node
            .clone()
            .or_else(|| options.name.clone())
            .unwrap_or_default();
        let start_time = chrono::Utc::now();

        if !options.skip_logging {
            let _ = child_ctx.log_event(Event {
                event_type: EventType::StepStart,
                run_id: Some(self.0.run_id),
                step: Some(step),
                source: self.0.source_name.clone(),
                source_node: source_node.clone(),
                start_time: Some(start_time),
                end_time: None,
                data: serde_json::to_value(StepStartData {
                    parent_step: self.0.current_step,
                    tags: options.tags.clone(),
                    info: None,
                    input: options.input.clone().unwrap_or(Value::Null),
                })
                .unwrap_or(Value::Null),
                meta: None,
            });
        }

        let result = body(child_ctx.clone()).await;
        let end_time = chrono::Utc::now();
        let info = child_ctx.0.info.lock().clone();

        match &result {
            Ok(output) => {
                if !options.skip_logging {
                    let _ = child_ctx.log_event(Event {
                        event_type: EventType::StepEnd,
                        run_id: Some(self.0.run_id),
                        step: Some(step),
                        source: self.0.source_name.clone(),
                        source_node,
                        start_time: Some(start_time),
                        end_time: Some(end_time),
                        data: serde_json::to_value(StepEndData {
                            output: serde_json::to_value(output.clone()).unwrap_or(Value::Null),
                            info: Some(Value::Object(info)),
                        })
                        .unwrap_or(Value::Null),
                        meta: None,
                    });
                }
            }
            Err(error) => {
                if !options.skip_logging {
                    let _ = child_ctx.log_event(Event {
                        event_type: EventType::StepError,
                        run_id: Some(self.0.run_id),
                        step: Some(step),
                        source: self.0.source_name.clone(),
                        source_node,
                        start_time: Some(start_time),
                        end_time: Some(end_time),
                        data: serde_json::json!({ "error": error.to_string() }),
                        meta: None,
                    });
                }
            }
        }

        result
    }

    /// Wrap a function so that calling it always runs inside `run_step`,
    /// using `name` as the step name and the call's argument as `input`.
    pub fn as_step<F, Fut, A, T>(
        &self,
        name: impl Into<String>,
        f: F,
    ) -> impl Fn(A) -> std::pin::Pin<Box<dyn Future<Output = Result<T, crate::error::BodyError>> + Send>>
    where
        F: Fn(RunContext, A) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T, crate::error::BodyError>> + Send + 'static,
        A: Serialize + Send + 'static,
        T: Serialize + Clone + Send + 'static,
    {
        let ctx = self.clone();
        let name = name.into();
        move |arg: A| {
            let ctx = ctx.clone();
            let f = f.clone();
            let name = name.clone();
            Box::pin(async move {
                let input = serde_json::to_value(&arg).unwrap_or(Value::Null);
                ctx.run_step(
                    StepOptions {
                        name: Some(name),
                        input: Some(input),
                        ..Default::default()
                    },
                    move |child_ctx| f(child_ctx, arg),
                )
                .await
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;

    fn test_ctx(bus: &EventBus) -> RunContext {
        RunContext::start_run(StartRunOptions {
            source_name: "test".to_string(),
            sink: bus.get_emitter(),
            run_id: None,
        })
    }

    #[tokio::test]
    async fn run_step_carries_explicit_input() {
        let bus = EventBus::with_sinks(vec![]);
        let mut stream = bus.subscribe();
        let ctx = test_ctx(&bus);

        ctx.run_step(
            StepOptions {
                name: Some("greet".to_string()),
                input: Some(serde_json::json!({ "who": "world" })),
                ..Default::default()
            },
            |_child| async move { Ok::<_, crate::error::BodyError>(serde_json::json!("hi")) },
        )
        .await
        .unwrap();

        let start = loop {
            let event = stream.try_recv().expect("step:start should have been emitted");
            if matches!(event.event_type, EventType::StepStart) {
                break event;
            }
        };
        assert_eq!(start.source_node, "greet");
        assert_eq!(start.data["input"], serde_json::json!({ "who": "world" }));
    }

    #[tokio::test]
    async fn as_step_serializes_argument_into_input() {
        let bus = EventBus::with_sinks(vec![]);
        let mut stream = bus.subscribe();
        let ctx = test_ctx(&bus);

        let stepped = ctx.as_step("double", |_child, n: i64| async move {
            Ok::<_, crate::error::BodyError>(serde_json::json!(n * 2))
        });

        let output = stepped(21).await.unwrap();
        assert_eq!(output, serde_json::json!(42));

        let start = loop {
            let event = stream.try_recv().expect("step:start should have been emitted");
            if matches!(event.event_type, EventType::StepStart) {
                break event;
            }
        };
        assert_eq!(start.source_node, "double");
        assert_eq!(start.data["input"], serde_json::json!(21));
    }
}
