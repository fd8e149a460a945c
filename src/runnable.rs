//! The `Runnable` contract shared by the DAG and state-machine runners, and
//! the `watch`-backed completion primitive both use to implement it (see the
//! design note on replacing one-shot emitter subscriptions with completion
//! futures in `SPEC_FULL.md` §9).

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::RunError;
use crate::types::Value;

/// The terminal outcome of a run: the output value, the first error, or a
/// cancellation.
pub type RunOutcome = Result<Value, RunError>;

/// Common surface implemented by `DagRunner` and `StateMachineRunner`.
#[async_trait]
pub trait Runnable: Send + Sync {
    /// Launch the run. Returns once scheduling has started; does not wait
    /// for completion — use [`Runnable::finished`] for that.
    async fn run(&self) -> Result<(), RunError>;

    /// A lazily-awaitable handle to the terminal outcome. Resolves with the
    /// output, the first error, or a cancellation. May be awaited from
    /// multiple callers and before or after the run completes.
    async fn finished(&self) -> RunOutcome;

    /// Request cooperative cancellation.
    fn cancel(&self);
}

/// A single-writer, multi-reader completion signal. `complete` is called
/// exactly once; every clone of the receiver half observes the same
/// outcome, including clones taken before completion.
#[derive(Clone)]
pub(crate) struct CompletionTx(watch::Sender<Option<RunOutcome>>);

#[derive(Clone)]
pub(crate) struct CompletionRx(watch::Receiver<Option<RunOutcome>>);

pub(crate) fn completion_pair() -> (CompletionTx, CompletionRx) {
    let (tx, rx) = watch::channel(None);
    (CompletionTx(tx), CompletionRx(rx))
}

impl CompletionTx {
    /// Resolve the completion. A second call is a no-op (the first writer
    /// wins); callers should still only call this once per the ordering
    /// guarantee in §4.5.
    pub fn complete(&self, outcome: RunOutcome) {
        self.0.send_if_modified(|slot| {
            if slot.is_some() {
                false
            } else {
                *slot = Some(outcome);
                true
            }
        });
    }
}

impl CompletionRx {
    /// Await the outcome, observing it immediately if already resolved.
    pub async fn wait(&mut self) -> RunOutcome {
        loop {
            if let Some(outcome) = self.0.borrow().clone() {
                return outcome;
            }
            if self.0.changed().await.is_err() {
                return Err(RunError::Cancelled);
            }
        }
    }

    /// Non-blocking peek at the outcome, if resolved.
    pub fn peek(&self) -> Option<RunOutcome> {
        self.0.borrow().clone()
    }
}
