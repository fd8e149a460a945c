//! The DAG node body contract: the interface produced to user code.
//!
//! A node body is handed a [`NodeInput`] bag (context, parents' outputs,
//! root input, a tracing span, and cancellation probes) and returns a
//! [`Value`] or a [`BodyError`].

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tracing::Span;

use crate::context::RunContext;
use crate::error::{BodyError, Cancelled};
use crate::types::Value;

/// Cooperative cancellation probe threaded into every node/state body.
#[derive(Clone)]
pub struct CancelProbe(tokio_util::sync::CancellationToken);

impl CancelProbe {
    pub(crate) fn new(token: tokio_util::sync::CancellationToken) -> Self {
        Self(token)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Raise the [`Cancelled`] sentinel if cancellation was requested. The
    /// runner treats this as non-error, non-reported termination.
    pub fn exit_if_cancelled(&self) -> Result<(), Cancelled> {
        if self.0.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// The bag of values a DAG node body receives.
///
/// `input` holds each declared parent's output by name; a parent that failed
/// under `tolerate_parent_errors` is present with value `Value::Null` (§9's
/// resolved "run with all-undefined inputs" semantics).
pub struct NodeInput<C> {
    pub ctx: RunContext,
    pub context: Arc<C>,
    pub input: FxHashMap<String, Value>,
    pub root_input: Value,
    pub span: Span,
    pub cancel: CancelProbe,
}

impl<C> NodeInput<C> {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn exit_if_cancelled(&self) -> Result<(), Cancelled> {
        self.cancel.exit_if_cancelled()
    }
}

/// A DAG node's body.
#[async_trait]
pub trait NodeBody<C>: Send + Sync
where
    C: Send + Sync + 'static,
{
    async fn run(&self, input: NodeInput<C>) -> Result<Value, BodyError>;
}

struct FnNodeBody<C, F> {
    f: F,
    _marker: PhantomData<fn(C)>,
}

#[async_trait]
impl<C, F, Fut> NodeBody<C> for FnNodeBody<C, F>
where
    C: Send + Sync + 'static,
    F: Fn(NodeInput<C>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BodyError>> + Send,
{
    async fn run(&self, input: NodeInput<C>) -> Result<Value, BodyError> {
        (self.f)(input).await
    }
}

/// Adapt a plain async closure into a [`NodeBody`] trait object.
///
/// ```rust
/// use ramus::node::node_fn;
/// use serde_json::json;
///
/// let _body = node_fn(|input: ramus::node::NodeInput<()>| async move {
///     Ok(json!(input.root_input.as_i64().unwrap_or(0) + 1))
/// });
/// ```
pub fn node_fn<C, F, Fut>(f: F) -> Arc<dyn NodeBody<C>>
where
    C: Send + Sync + 'static,
    F: Fn(NodeInput<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, BodyError>> + Send + 'static,
{
    Arc::new(FnNodeBody {
        f,
        _marker: PhantomData,
    })
}
