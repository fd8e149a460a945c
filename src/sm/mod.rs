//! The hierarchical state-machine runner: one state body at a time, advanced
//! by declared transitions and externally injected events.

mod body;
mod definition;
mod runner;
mod transition;

pub use body::{state_fn, StateBody, StateInput};
pub use definition::{
    ConditionContext, ConditionFn, ConditionOutcome, GuardedTarget, StateDescriptor, StateMachineDefinition,
    Transition,
};
pub use runner::{
    run_state_machine, CurrentState, SendEvent, SmRunError, SmRunOptions, SmStatus, StateMachineRunner,
};
pub use transition::{available_events, resolve};
