//! The DAG runner: compiles a node mapping into root/leaf sets, then
//! schedules each node as its parents resolve, fanning out root nodes
//! concurrently and collecting leaf outputs into a synthetic result.

mod compiler;
mod definition;
mod node_runner;
mod runner;

pub use compiler::{compile, CompiledDag};
pub use definition::{DagDefinition, NodeDescriptor};
pub use node_runner::NodeState;
pub use runner::{run_dag, DagRunError, DagRunOptions, DagRunner};
