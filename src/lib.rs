//! # Ramus: a DAG runner and hierarchical state-machine runner
//!
//! Ramus provides two complementary execution engines — a dependency-graph
//! (`dag`) scheduler and a hierarchical state-machine (`sm`) runner — unified
//! under a shared step-tracing [`context::RunContext`], a keyed
//! [`semaphore::SemaphoreRegistry`], a content-addressed [`cache::ResultCache`],
//! and a closed [`event_bus::EventType`] taxonomy.
//!
//! ## Core Concepts
//!
//! - **`RunContext`**: causally-linked run/step identifiers threaded
//!   explicitly through every node/state body
//! - **`dag`**: compiles a node mapping into root/leaf sets, then schedules
//!   each node as its parents resolve
//! - **`sm`**: drives a single state machine one state at a time, advanced by
//!   declared transitions and externally injected events
//! - **`EventBus`**: a broadcast-backed sink every run publishes structured
//!   events to, for external observers
//! - **`SemaphoreRegistry`** / **`ResultCache`**: shared, keyed resource
//!   limiting and memoisation, usable by both runners
//!
//! ## Quick Start
//!
//! ### Running a small DAG
//!
//! ```
//! use ramus::context::{RunContext, StartRunOptions};
//! use ramus::dag::{run_dag, DagDefinition, DagRunOptions, NodeDescriptor};
//! use ramus::event_bus::EventBus;
//! use ramus::node::node_fn;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::default();
//! let ctx = RunContext::start_run(StartRunOptions {
//!     source_name: "doubler".to_string(),
//!     sink: bus.get_emitter(),
//!     run_id: None,
//! });
//!
//! let definition = DagDefinition::new("doubler").add_node(
//!     "double",
//!     NodeDescriptor::new(node_fn(|input: ramus::node::NodeInput<()>| async move {
//!         Ok(json!(input.root_input.as_i64().unwrap_or(0) * 2))
//!     })),
//! );
//!
//! let output = run_dag(definition, DagRunOptions::new(ctx, json!(21), ())).await.unwrap();
//! assert_eq!(output, json!(42));
//! # }
//! ```
//!
//! ### Defining a state machine transition
//!
//! ```
//! use ramus::sm::{GuardedTarget, StateDescriptor, StateMachineDefinition, Transition};
//! use rustc_hash::FxHashMap;
//!
//! let mut keyed = FxHashMap::default();
//! keyed.insert(String::new(), vec![GuardedTarget::<()>::always("done")]);
//!
//! let definition = StateMachineDefinition::<()>::new("tiny", "start")
//!     .add_state(
//!         "start",
//!         StateDescriptor::new().transition(Transition::Keyed(keyed)),
//!     )
//!     .add_state("done", StateDescriptor::new().final_state(true));
//!
//! definition.validate().unwrap();
//! ```
//!
//! ## Module Guide
//!
//! - [`context`] — the `RunContext` substrate and step tracing
//! - [`event_bus`] — the structured event taxonomy and broadcast sink
//! - [`node`] — the DAG node body contract (`NodeBody`/`NodeInput`)
//! - [`dag`] — DAG compilation and execution
//! - [`sm`] — state-machine definition, transition resolution, and execution
//! - [`runnable`] — the `Runnable` contract shared by both runners
//! - [`semaphore`] — keyed, multi-registry counting semaphores
//! - [`cache`] — content-addressed node output memoisation
//! - [`telemetry`] — `tracing`-subscriber wiring for development and tests
//! - [`error`] — the crate's error taxonomy
//! - [`types`] — `RunId`/`StepId` and the `Value` alias

pub mod cache;
pub mod context;
pub mod dag;
pub mod error;
pub mod event_bus;
pub mod node;
pub mod runnable;
pub mod semaphore;
pub mod sm;
pub mod telemetry;
pub mod types;
