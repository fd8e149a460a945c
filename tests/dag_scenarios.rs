//! End-to-end DAG scenarios, mirroring the literal examples worked through
//! in the design spec.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ramus::context::{RunContext, StartRunOptions};
use ramus::dag::{run_dag, DagDefinition, DagRunError, DagRunOptions, NodeDescriptor};
use ramus::event_bus::{EventBus, EventType};
use ramus::node::node_fn;
use serde_json::{json, Value};

struct Ctx {
    ctx_value: i64,
}

fn new_context(source_name: &str) -> (RunContext, Arc<EventBus>) {
    let bus = Arc::new(EventBus::default());
    let ctx = RunContext::start_run(StartRunOptions {
        source_name: source_name.to_string(),
        sink: bus.get_emitter(),
        run_id: None,
    });
    (ctx, bus)
}

#[tokio::test]
async fn scenario_a_diamond_dag() {
    let (ctx, bus) = new_context("diamond");
    let mut stream = bus.subscribe();

    let definition = DagDefinition::new("diamond")
        .add_node(
            "root",
            NodeDescriptor::new(node_fn(|input: ramus::node::NodeInput<Ctx>| async move {
                Ok(json!(input.context.ctx_value + 1))
            })),
        )
        .add_node(
            "intone",
            NodeDescriptor::new(node_fn(|input: ramus::node::NodeInput<Ctx>| async move {
                let root = input.input.get("root").and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(json!(root + 1))
            }))
            .parents(["root"]),
        )
        .add_node(
            "inttwo",
            NodeDescriptor::new(node_fn(|input: ramus::node::NodeInput<Ctx>| async move {
                let root = input.input.get("root").and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(json!(root + 1))
            }))
            .parents(["root"]),
        )
        .add_node(
            "collector",
            NodeDescriptor::new(node_fn(|input: ramus::node::NodeInput<Ctx>| async move {
                let one = input.input.get("intone").and_then(|v| v.as_i64()).unwrap_or(0);
                let two = input.input.get("inttwo").and_then(|v| v.as_i64()).unwrap_or(0);
                let root_input = input.root_input.as_i64().unwrap_or(0);
                Ok(json!(one + two + root_input))
            }))
            .parents(["intone", "inttwo"]),
        );

    let options = DagRunOptions::new(ctx, json!(10), Ctx { ctx_value: 5 });
    let output = run_dag(definition, options).await.unwrap();
    assert_eq!(output, json!(24));

    let mut node_starts = 0;
    let mut dag_starts = 0;
    while let Ok(event) = stream.try_recv() {
        match event.event_type {
            EventType::DagNodeStart => node_starts += 1,
            EventType::DagStart => dag_starts += 1,
            _ => {}
        }
    }
    assert_eq!(node_starts, 4);
    assert_eq!(dag_starts, 1);
}

#[tokio::test]
async fn scenario_b_empty_dag_errors() {
    let (ctx, _bus) = new_context("empty");
    let definition = DagDefinition::<()>::new("empty");
    let options = DagRunOptions::new(ctx, json!(null), ());
    let err = run_dag(definition, options).await.unwrap_err();
    match err {
        DagRunError::Compile(compile_err) => {
            assert!(compile_err.to_string().contains("DAG has no nodes"));
        }
        other => panic!("expected a compile error, got {other:?}"),
    }
}

fn multi_leaf_dag(fail_output_one: bool) -> DagDefinition<()> {
    DagDefinition::new("multi_leaf")
        .add_node(
            "root",
            NodeDescriptor::new(node_fn(|_input: ramus::node::NodeInput<()>| async move { Ok(json!(6)) })),
        )
        .add_node(
            "output_one",
            NodeDescriptor::new(node_fn(move |input: ramus::node::NodeInput<()>| async move {
                if fail_output_one {
                    return Err("output_one failed".into());
                }
                let root = input.input.get("root").and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(json!(root + 1))
            }))
            .parents(["root"]),
        )
        .add_node(
            "output_two",
            NodeDescriptor::new(node_fn(|input: ramus::node::NodeInput<()>| async move {
                let root = input.input.get("root").and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(json!(root + 2))
            }))
            .parents(["root"]),
        )
}

#[tokio::test]
async fn scenario_c_multi_leaf_without_collector() {
    let (ctx, _bus) = new_context("multi_leaf");
    let definition = multi_leaf_dag(false);
    let options = DagRunOptions::new(ctx, json!(null), ());
    let output = run_dag(definition, options).await.unwrap();
    assert_eq!(output, json!({ "output_one": 7, "output_two": 8 }));
}

#[tokio::test]
async fn scenario_d_tolerate_failures() {
    let (ctx, _bus) = new_context("tolerate");
    let definition = multi_leaf_dag(true).tolerate_failures(true);
    let options = DagRunOptions::new(ctx, json!(null), ());
    let output = run_dag(definition, options).await.unwrap();
    assert_eq!(output["output_two"], json!(8));
    assert_eq!(output["output_one"], Value::Null);
}

#[tokio::test]
async fn scenario_e_intolerant_failure_rejects() {
    let (ctx, _bus) = new_context("intolerant");
    let definition = multi_leaf_dag(true).tolerate_failures(false);
    let options = DagRunOptions::new(ctx, json!(null), ());
    let err = run_dag(definition, options).await.unwrap_err();
    match err {
        DagRunError::Run(run_err) => {
            let text = run_err.to_string();
            assert!(text.contains("output_one"));
        }
        other => panic!("expected a run error, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_g_semaphore_cap() {
    use ramus::semaphore::SemaphoreRegistry;

    let registry = Arc::new(SemaphoreRegistry::new());
    registry.set_limit("k", 5);

    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));

    let (ctx, _bus) = new_context("semaphore_cap");
    let mut definition = DagDefinition::<()>::new("semaphore_cap");
    for i in 0..20 {
        let in_flight = Arc::clone(&in_flight);
        let max_in_flight = Arc::clone(&max_in_flight);
        definition = definition.add_node(
            format!("n{i}"),
            NodeDescriptor::new(node_fn(move |_input: ramus::node::NodeInput<()>| {
                let in_flight = Arc::clone(&in_flight);
                let max_in_flight = Arc::clone(&max_in_flight);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_in_flight.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(json!(i))
                }
            }))
            .semaphore_key("k"),
        );
    }

    let mut options = DagRunOptions::new(ctx, json!(null), ());
    options.semaphores = vec![registry];
    run_dag(definition, options).await.unwrap();

    assert!(max_in_flight.load(Ordering::SeqCst) <= 5);
}
