//! State machine definition types and construction-time validation.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::body::StateBody;
use crate::error::StateMachineValidationError;
use crate::types::Value;

/// The result of evaluating a [`ConditionFn`]: either a plain boolean, or the
/// distilled source's `{transition: bool | null}` object form, where `null`
/// also means "fire".
#[derive(Clone, Copy, Debug)]
pub enum ConditionOutcome {
    Bool(bool),
    /// `None` stands for a `null` `transition` field (fires); `Some(b)`
    /// stands for an explicit boolean.
    Object(Option<bool>),
}

impl ConditionOutcome {
    #[must_use]
    pub fn fires(self) -> bool {
        match self {
            Self::Bool(fires) => fires,
            Self::Object(Some(fires)) => fires,
            Self::Object(None) => true,
        }
    }
}

/// Ambient values a guard condition is evaluated against.
pub struct ConditionContext<C> {
    pub context: Arc<C>,
    pub input: Value,
    pub output: Value,
    pub event: Option<String>,
}

pub type ConditionFn<C> = Arc<dyn Fn(&ConditionContext<C>) -> ConditionOutcome + Send + Sync>;

/// One candidate target within a keyed transition list; evaluated in
/// declaration order, first match wins.
pub struct GuardedTarget<C> {
    pub target: String,
    pub condition: Option<ConditionFn<C>>,
}

impl<C> GuardedTarget<C> {
    #[must_use]
    pub fn always(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            condition: None,
        }
    }

    #[must_use]
    pub fn guarded(target: impl Into<String>, condition: ConditionFn<C>) -> Self {
        Self {
            target: target.into(),
            condition: Some(condition),
        }
    }
}

/// A state's declared transition, polymorphic over the distilled source's
/// `string | map<string, string | Transition | Transition[]>` shape (§9).
pub enum Transition<C> {
    /// Fires only for the empty ("always") event; the string form ignores
    /// events entirely.
    Unconditional(String),
    /// Fires for a specific event type; `""` is the "always" key.
    Keyed(FxHashMap<String, Vec<GuardedTarget<C>>>),
}

/// One state's static declaration.
pub struct StateDescriptor<C> {
    pub run: Option<Arc<dyn StateBody<C>>>,
    pub transition: Option<Transition<C>>,
    pub semaphore_key: Option<String>,
    /// Overrides the machine-level `error_state` when this state's body
    /// fails.
    pub error_state: Option<String>,
    pub tags: Option<Value>,
    /// Marks this state as terminal: reaching it halts scheduling regardless
    /// of whether it also declares a `run` body or a `transition`.
    pub is_final: bool,
}

impl<C> StateDescriptor<C> {
    pub fn new() -> Self {
        Self {
            run: None,
            transition: None,
            semaphore_key: None,
            error_state: None,
            tags: None,
            is_final: false,
        }
    }

    #[must_use]
    pub fn run_with(mut self, body: Arc<dyn StateBody<C>>) -> Self {
        self.run = Some(body);
        self
    }

    #[must_use]
    pub fn transition(mut self, transition: Transition<C>) -> Self {
        self.transition = Some(transition);
        self
    }

    #[must_use]
    pub fn semaphore_key(mut self, key: impl Into<String>) -> Self {
        self.semaphore_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn error_state(mut self, state: impl Into<String>) -> Self {
        self.error_state = Some(state.into());
        self
    }

    /// Marks this state as terminal. A state can be final and still carry a
    /// `run` body (a cleanup/logging terminal state) — finality is an
    /// independent flag, not inferred from the absence of a body.
    #[must_use]
    pub fn final_state(mut self, is_final: bool) -> Self {
        self.is_final = is_final;
        self
    }

    /// Every state name this descriptor's transition can name as a target,
    /// in no particular order.
    fn transition_targets(&self) -> Vec<&str> {
        match &self.transition {
            None => Vec::new(),
            Some(Transition::Unconditional(target)) => vec![target.as_str()],
            Some(Transition::Keyed(map)) => map
                .values()
                .flat_map(|targets| targets.iter().map(|t| t.target.as_str()))
                .collect(),
        }
    }
}

impl<C> Default for StateDescriptor<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// A whole state machine: its node mapping plus the initial state and
/// optional machine-level error fallback.
pub struct StateMachineDefinition<C> {
    pub name: String,
    pub nodes: FxHashMap<String, StateDescriptor<C>>,
    pub initial: String,
    pub error_state: Option<String>,
}

impl<C> StateMachineDefinition<C> {
    pub fn new(name: impl Into<String>, initial: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: FxHashMap::default(),
            initial: initial.into(),
            error_state: None,
        }
    }

    #[must_use]
    pub fn add_state(mut self, name: impl Into<String>, state: StateDescriptor<C>) -> Self {
        self.nodes.insert(name.into(), state);
        self
    }

    #[must_use]
    pub fn error_state(mut self, state: impl Into<String>) -> Self {
        self.error_state = Some(state.into());
        self
    }

    /// Validate every name reference (`initial`, machine/node `error_state`,
    /// transition targets) before any state runs.
    pub fn validate(&self) -> Result<(), StateMachineValidationError> {
        if !self.nodes.contains_key(&self.initial) {
            return Err(StateMachineValidationError::UnknownInitial(self.initial.clone()));
        }
        if let Some(error_state) = &self.error_state {
            if !self.nodes.contains_key(error_state) {
                return Err(StateMachineValidationError::UnknownMachineErrorState(error_state.clone()));
            }
        }
        for (name, descriptor) in &self.nodes {
            if let Some(error_state) = &descriptor.error_state {
                if !self.nodes.contains_key(error_state) {
                    return Err(StateMachineValidationError::UnknownNodeErrorState {
                        state: name.clone(),
                        target: error_state.clone(),
                    });
                }
            }
            for target in descriptor.transition_targets() {
                if !self.nodes.contains_key(target) {
                    return Err(StateMachineValidationError::UnknownTarget {
                        state: name.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
