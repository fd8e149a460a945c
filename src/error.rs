//! Error taxonomy for the crate, per the error handling design.
//!
//! Construction errors (DAG compilation, state-machine validation) are rich,
//! `miette`-diagnosable values meant to be printed to a terminal during
//! development. Runtime errors (a node body failing) are plain `thiserror`
//! values carried as event/ outcome data, not printed directly.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

/// A user-supplied node or state body's error type.
///
/// Node and state bodies return `Result<Value, BodyError>`; any
/// `std::error::Error` implementor converts via `?`.
pub type BodyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The distinguished cancellation sentinel.
///
/// Raised by `exit_if_cancelled()` and treated by the runner as non-error,
/// non-reported termination (no `*:node_error`/`ramus:error` is emitted).
#[derive(Debug, Error, Clone, Copy, Default)]
#[error("operation was cancelled")]
pub struct Cancelled;

/// A node or state body error, captured once and shared across every
/// subscriber of the node's completion signal.
#[derive(Debug, Error, Clone)]
#[error("{source_node}: {message}")]
pub struct NodeError {
    /// Name of the node or state whose body failed.
    pub source_node: String,
    /// `Display` rendering of the original body error.
    pub message: String,
}

impl NodeError {
    pub fn new(source_node: impl Into<String>, error: &BodyError) -> Self {
        Self {
            source_node: source_node.into(),
            message: error.to_string(),
        }
    }
}

/// Errors constructing a DAG: these must always be caught before scheduling,
/// never surfaced mid-run.
#[derive(Debug, Error, Diagnostic)]
pub enum DagCompileError {
    #[error("DAG has no nodes")]
    #[diagnostic(code(ramus::dag::empty), help("add at least one node before compiling"))]
    NoNodes,

    #[error("node {child:?} declares unknown parent {parent:?}")]
    #[diagnostic(
        code(ramus::dag::unknown_parent),
        help("every parent name must match a declared node")
    )]
    UnknownParent { child: String, parent: String },

    #[error("cycle detected: {}", path.join(" -> "))]
    #[diagnostic(code(ramus::dag::cycle), help("remove the edge that closes the cycle"))]
    Cycle { path: Vec<String> },
}

/// Errors constructing a state machine definition.
#[derive(Debug, Error, Diagnostic)]
pub enum StateMachineValidationError {
    #[error("initial state {0:?} is not declared")]
    #[diagnostic(code(ramus::sm::unknown_initial))]
    UnknownInitial(String),

    #[error("machine-level error_state {0:?} is not declared")]
    #[diagnostic(code(ramus::sm::unknown_error_state))]
    UnknownMachineErrorState(String),

    #[error("state {state:?} declares unknown error_state {target:?}")]
    #[diagnostic(code(ramus::sm::unknown_node_error_state))]
    UnknownNodeErrorState { state: String, target: String },

    #[error("state {state:?} transitions to unknown state {target:?}")]
    #[diagnostic(code(ramus::sm::unknown_target))]
    UnknownTarget { state: String, target: String },
}

/// The terminal outcome of a `Runnable`'s `finished` future.
#[derive(Debug, Error, Clone)]
pub enum RunError {
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error("run was cancelled")]
    Cancelled,
}

/// Errors from the `Semaphore` registry's multi-key acquisition.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("semaphore acquisition was cancelled")]
    Cancelled,
}

/// Errors from a `ResultCache` implementation. Never fatal to a node; callers
/// log and proceed as on a cache miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Shared pointer form of [`NodeError`], used so multiple `watch` subscribers
/// can hold the same failure without re-cloning the underlying message.
pub type SharedNodeError = Arc<NodeError>;
