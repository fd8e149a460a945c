//! Demo: building and running a small fan-out/fan-in DAG.
//!
//! ```bash
//! cargo run --bin basic_dag
//! ```
//!
//! Reads `RAMUS_LOG` and `RAMUS_FETCH_LIMIT` from the environment (or a
//! `.env` file next to the binary) to configure logging verbosity and the
//! `fetch` semaphore's concurrency cap.

use std::sync::Arc;

use miette::Result;
use serde_json::json;
use tracing::info;
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ramus::context::{RunContext, StartRunOptions};
use ramus::dag::{run_dag, DagDefinition, DagRunOptions, NodeDescriptor};
use ramus::event_bus::EventBus;
use ramus::node::{node_fn, NodeInput};
use ramus::semaphore::SemaphoreRegistry;

struct AppContext {
    greeting: String,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("RAMUS_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(ErrorLayer::default())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine; a present-but-malformed one is worth knowing about.
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("warning: failed to load .env: {err}");
        }
    }
    init_tracing();

    let fetch_limit: usize = std::env::var("RAMUS_FETCH_LIMIT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(4);

    let bus = Arc::new(EventBus::default());
    bus.listen_for_events();

    let ctx = RunContext::start_run(StartRunOptions {
        source_name: "basic_dag".to_string(),
        sink: bus.get_emitter(),
        run_id: None,
    });

    let semaphores = Arc::new(SemaphoreRegistry::new());
    semaphores.set_limit("fetch", fetch_limit);

    let definition = DagDefinition::new("greeting")
        .add_node(
            "fetch_name",
            NodeDescriptor::new(node_fn(|input: NodeInput<AppContext>| async move {
                Ok(json!(input.root_input.as_str().unwrap_or("world")))
            }))
            .semaphore_key("fetch"),
        )
        .add_node(
            "greet",
            NodeDescriptor::new(node_fn(|input: NodeInput<AppContext>| async move {
                let name = input.input.get("fetch_name").and_then(|v| v.as_str()).unwrap_or("world");
                Ok(json!(format!("{}, {name}!", input.context.greeting)))
            }))
            .parents(["fetch_name"]),
        );

    let mut options = DagRunOptions::new(
        ctx,
        json!("Ramus"),
        AppContext {
            greeting: "hello".to_string(),
        },
    );
    options.semaphores.push(semaphores);

    let output = run_dag(definition, options).await.map_err(|err| miette::miette!("{err}"))?;
    info!(%output, "dag finished");

    bus.stop_listener().await;
    Ok(())
}
