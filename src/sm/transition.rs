//! Pure transition-resolution algorithm (§4.7): given a state's declared
//! [`Transition`] and the event that just occurred, decide the next state
//! name, if any. Kept free of `Inner` state so it is trivially unit-testable.

use super::definition::{ConditionContext, StateDescriptor, Transition};

/// Resolve `descriptor`'s transition against `event_type` (`""` for the
/// no-event "always" case).
///
/// - String form: fires only when `event_type` is empty; ignored otherwise.
/// - Keyed form: look up `event_type`'s guarded-target list; the first entry
///   whose condition is absent or fires wins. Entries whose condition
///   returns false are skipped, not retried.
pub fn resolve<C>(
    descriptor: &StateDescriptor<C>,
    event_type: &str,
    ctx: &ConditionContext<C>,
) -> Option<String> {
    match descriptor.transition.as_ref()? {
        Transition::Unconditional(target) => {
            if event_type.is_empty() {
                Some(target.clone())
            } else {
                None
            }
        }
        Transition::Keyed(map) => {
            let targets = map.get(event_type)?;
            for guarded in targets {
                match &guarded.condition {
                    None => return Some(guarded.target.clone()),
                    Some(condition) => {
                        if condition(ctx).fires() {
                            return Some(guarded.target.clone());
                        }
                    }
                }
            }
            None
        }
    }
}

/// Event types this state's transition can actually react to (excludes the
/// empty "always" key).
pub fn available_events<C>(descriptor: &StateDescriptor<C>) -> Vec<String> {
    match descriptor.transition.as_ref() {
        Some(Transition::Keyed(map)) => map
            .keys()
            .filter(|key| !key.is_empty())
            .cloned()
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rustc_hash::FxHashMap;

    use super::*;
    use crate::sm::definition::{ConditionOutcome, GuardedTarget};
    use crate::types::Value;

    fn ctx() -> ConditionContext<()> {
        ConditionContext {
            context: Arc::new(()),
            input: Value::Null,
            output: Value::Null,
            event: None,
        }
    }

    #[test]
    fn unconditional_fires_only_without_event() {
        let descriptor = StateDescriptor::<()>::new().transition(Transition::Unconditional("next".into()));
        assert_eq!(resolve(&descriptor, "", &ctx()), Some("next".to_string()));
        assert_eq!(resolve(&descriptor, "some_event", &ctx()), None);
    }

    #[test]
    fn keyed_first_unguarded_wins() {
        let mut map = FxHashMap::default();
        map.insert(
            "go".to_string(),
            vec![
                GuardedTarget::guarded("skip", Arc::new(|_: &ConditionContext<()>| ConditionOutcome::Bool(false))),
                GuardedTarget::always("take"),
                GuardedTarget::always("unreachable"),
            ],
        );
        let descriptor = StateDescriptor::<()>::new().transition(Transition::Keyed(map));
        assert_eq!(resolve(&descriptor, "go", &ctx()), Some("take".to_string()));
    }

    #[test]
    fn keyed_object_outcome_null_fires() {
        let mut map = FxHashMap::default();
        map.insert(
            "go".to_string(),
            vec![GuardedTarget::guarded(
                "take",
                Arc::new(|_: &ConditionContext<()>| ConditionOutcome::Object(None)),
            )],
        );
        let descriptor = StateDescriptor::<()>::new().transition(Transition::Keyed(map));
        assert_eq!(resolve(&descriptor, "go", &ctx()), Some("take".to_string()));
    }

    #[test]
    fn unknown_event_key_yields_none() {
        let mut map = FxHashMap::default();
        map.insert("go".to_string(), vec![GuardedTarget::always("take")]);
        let descriptor = StateDescriptor::<()>::new().transition(Transition::Keyed(map));
        assert_eq!(resolve(&descriptor, "other", &ctx()), None);
    }

    #[test]
    fn available_events_excludes_always_key() {
        let mut map = FxHashMap::default();
        map.insert("go".to_string(), vec![GuardedTarget::always("a")]);
        map.insert(String::new(), vec![GuardedTarget::always("b")]);
        let descriptor = StateDescriptor::<()>::new().transition(Transition::Keyed(map));
        assert_eq!(available_events(&descriptor), vec!["go".to_string()]);
    }
}
