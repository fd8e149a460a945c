//! The state body contract: mirrors `crate::node`'s `NodeBody`/`NodeInput`
//! but adds the state machine's own ambient values (`event`, `previous_state`).

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::Span;

use crate::context::RunContext;
use crate::error::BodyError;
use crate::node::CancelProbe;
use crate::types::Value;

/// The bag of values a state body receives.
pub struct StateInput<C> {
    pub ctx: RunContext,
    pub context: Arc<C>,
    pub input: Value,
    pub root_input: Value,
    pub event: Option<String>,
    pub previous_state: Option<String>,
    pub span: Span,
    pub cancel: CancelProbe,
}

impl<C> StateInput<C> {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn exit_if_cancelled(&self) -> Result<(), crate::error::Cancelled> {
        self.cancel.exit_if_cancelled()
    }
}

/// A state's body, run on entry to that state.
#[async_trait]
pub trait StateBody<C>: Send + Sync
where
    C: Send + Sync + 'static,
{
    async fn run(&self, input: StateInput<C>) -> Result<Value, BodyError>;
}

struct FnStateBody<C, F> {
    f: F,
    _marker: PhantomData<fn(C)>,
}

#[async_trait]
impl<C, F, Fut> StateBody<C> for FnStateBody<C, F>
where
    C: Send + Sync + 'static,
    F: Fn(StateInput<C>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BodyError>> + Send,
{
    async fn run(&self, input: StateInput<C>) -> Result<Value, BodyError> {
        (self.f)(input).await
    }
}

/// Adapt a plain async closure into a [`StateBody`] trait object.
pub fn state_fn<C, F, Fut>(f: F) -> Arc<dyn StateBody<C>>
where
    C: Send + Sync + 'static,
    F: Fn(StateInput<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, BodyError>> + Send + 'static,
{
    Arc::new(FnStateBody {
        f,
        _marker: PhantomData,
    })
}
