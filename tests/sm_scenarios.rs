//! End-to-end state-machine scenarios.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use ramus::context::{RunContext, StartRunOptions};
use ramus::error::StateMachineValidationError;
use ramus::event_bus::{EventBus, EventType};
use ramus::sm::{
    run_state_machine, state_fn, ConditionOutcome, GuardedTarget, SmRunOptions, SmStatus, StateDescriptor,
    StateMachineDefinition, Transition,
};
use rustc_hash::FxHashMap;
use serde_json::json;

struct Ctx {
    value: AtomicI64,
}

fn round_trip_definition() -> StateMachineDefinition<Ctx> {
    let start = StateDescriptor::new()
        .run_with(state_fn(|input: ramus::sm::StateInput<Ctx>| async move {
            input.context.value.fetch_add(1, Ordering::SeqCst);
            Ok(input.root_input)
        }))
        .transition(Transition::Unconditional("one".to_string()));

    let mut one_targets = FxHashMap::default();
    one_targets.insert(
        String::new(),
        vec![
            GuardedTarget::guarded(
                "two",
                Arc::new(|cctx: &ramus::sm::ConditionContext<Ctx>| {
                    ConditionOutcome::Bool(cctx.context.value.load(Ordering::SeqCst) < 6)
                }),
            ),
            GuardedTarget::always("done"),
        ],
    );
    let one = StateDescriptor::new()
        .run_with(state_fn(|input: ramus::sm::StateInput<Ctx>| async move {
            input.context.value.fetch_add(1, Ordering::SeqCst);
            let doubled = input.input.as_i64().unwrap_or(0) * 2;
            Ok(json!(doubled))
        }))
        .transition(Transition::Keyed(one_targets));

    let two = StateDescriptor::new()
        .run_with(state_fn(|input: ramus::sm::StateInput<Ctx>| async move {
            input.context.value.fetch_add(1, Ordering::SeqCst);
            let tripled = input.input.as_i64().unwrap_or(0) * 3;
            Ok(json!(tripled))
        }))
        .transition(Transition::Unconditional("one".to_string()));

    let done = StateDescriptor::new().final_state(true);

    StateMachineDefinition::new("round_trip", "start")
        .add_state("start", start)
        .add_state("one", one)
        .add_state("two", two)
        .add_state("done", done)
}

#[tokio::test]
async fn scenario_f_state_machine_round_trip() {
    let bus = Arc::new(EventBus::default());
    let ctx = RunContext::start_run(StartRunOptions {
        source_name: "round_trip".to_string(),
        sink: bus.get_emitter(),
        run_id: None,
    });
    let mut stream = bus.subscribe();

    let definition = round_trip_definition();
    let options = SmRunOptions::new(ctx, json!(1), Ctx { value: AtomicI64::new(1) });
    let output = run_state_machine(definition, options).await.unwrap();

    assert_eq!(output, json!(72));

    let mut node_starts = 0;
    while let Ok(event) = stream.try_recv() {
        if event.event_type == EventType::StateMachineNodeStart {
            node_starts += 1;
        }
    }
    assert_eq!(node_starts, 6);
}

#[tokio::test]
async fn scenario_f_current_state_reaches_final() {
    use ramus::runnable::Runnable;

    let bus = Arc::new(EventBus::default());
    let ctx = RunContext::start_run(StartRunOptions {
        source_name: "round_trip".to_string(),
        sink: bus.get_emitter(),
        run_id: None,
    });

    let definition = round_trip_definition();
    let options = SmRunOptions::new(ctx, json!(1), Ctx { value: AtomicI64::new(1) });
    let runner = ramus::sm::StateMachineRunner::build(definition, options).unwrap();
    runner.run().await.unwrap();
    runner.finished().await.unwrap();

    let current = runner.current_state();
    assert_eq!(current.state, "done");
    assert_eq!(current.input, json!(72));
    assert_eq!(runner.status(), SmStatus::Final);
}

#[tokio::test]
async fn validation_rejects_unknown_initial_state() {
    let definition = StateMachineDefinition::<()>::new("broken", "missing").add_state("present", StateDescriptor::new());
    let err = definition.validate().unwrap_err();
    assert!(matches!(err, StateMachineValidationError::UnknownInitial(name) if name == "missing"));
}

#[tokio::test]
async fn validation_rejects_unknown_transition_target() {
    let descriptor = StateDescriptor::<()>::new().transition(Transition::Unconditional("ghost".to_string()));
    let definition = StateMachineDefinition::new("broken", "start").add_state("start", descriptor);
    let err = definition.validate().unwrap_err();
    assert!(matches!(
        err,
        StateMachineValidationError::UnknownTarget { state, target }
            if state == "start" && target == "ghost"
    ));
}
