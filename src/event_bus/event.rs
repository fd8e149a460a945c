//! The structured event shape ("Step event") and the closed framework event
//! type registry.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{RunId, StepId, Value};

/// The closed set of framework-originated event types, plus an open variant
/// for events a node/state body emits itself.
///
/// Any `type` outside this set is a user event (`EventType::User`); the
/// distinction the distilled source drew by prefixing a bespoke `ramus:`
/// event name is captured here structurally instead (see the design notes).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[serde(rename = "dag:start")]
    DagStart,
    #[serde(rename = "dag:finish")]
    DagFinish,
    #[serde(rename = "dag:error")]
    DagError,
    #[serde(rename = "dag:node_start")]
    DagNodeStart,
    #[serde(rename = "dag:node_finish")]
    DagNodeFinish,
    #[serde(rename = "dag:node_error")]
    DagNodeError,
    #[serde(rename = "dag:node_state")]
    DagNodeState,
    #[serde(rename = "state_machine:start")]
    StateMachineStart,
    #[serde(rename = "state_machine:status")]
    StateMachineStatus,
    #[serde(rename = "state_machine:transition")]
    StateMachineTransition,
    #[serde(rename = "state_machine:node_start")]
    StateMachineNodeStart,
    #[serde(rename = "state_machine:node_finish")]
    StateMachineNodeFinish,
    #[serde(rename = "state_machine:error")]
    StateMachineError,
    #[serde(rename = "step:start")]
    StepStart,
    #[serde(rename = "step:end")]
    StepEnd,
    #[serde(rename = "step:error")]
    StepError,
    /// A user event produced by a node or state body. The inner string is
    /// the caller-chosen `type` tag.
    User(String),
}

impl EventType {
    /// True for every variant other than [`EventType::User`].
    #[must_use]
    pub fn is_framework(&self) -> bool {
        !matches!(self, Self::User(_))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::DagStart => "dag:start",
            Self::DagFinish => "dag:finish",
            Self::DagError => "dag:error",
            Self::DagNodeStart => "dag:node_start",
            Self::DagNodeFinish => "dag:node_finish",
            Self::DagNodeError => "dag:node_error",
            Self::DagNodeState => "dag:node_state",
            Self::StateMachineStart => "state_machine:start",
            Self::StateMachineStatus => "state_machine:status",
            Self::StateMachineTransition => "state_machine:transition",
            Self::StateMachineNodeStart => "state_machine:node_start",
            Self::StateMachineNodeFinish => "state_machine:node_finish",
            Self::StateMachineError => "state_machine:error",
            Self::StepStart => "step:start",
            Self::StepEnd => "step:end",
            Self::StepError => "step:error",
            Self::User(s) => s.as_str(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The on-the-wire unit of observability.
///
/// Invariant: every `*:start` event with step `S` is followed by exactly one
/// of `*:end` / `*:error` with the same `run_id` and `step`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub run_id: Option<RunId>,
    pub step: Option<StepId>,
    pub source: String,
    pub source_node: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub data: Value,
    pub meta: Option<Value>,
}

impl Event {
    #[must_use]
    pub fn to_json_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// A short label for telemetry formatters: `source` alone for
    /// workflow-level events, `source/source_node` otherwise.
    #[must_use]
    pub fn scope_label(&self) -> Option<String> {
        if self.source_node.is_empty() {
            Some(self.source.clone())
        } else {
            Some(format!("{}/{}", self.source, self.source_node))
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} step={}",
            self.event_type,
            self.scope_label().unwrap_or_default(),
            self.step
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string())
        )
    }
}

/// Payload for `*_start` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepStartData {
    pub parent_step: Option<StepId>,
    pub tags: Option<Value>,
    pub info: Option<Value>,
    pub input: Value,
}

/// Payload for `*_finish` / `step:end` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepEndData {
    pub output: Value,
    pub info: Option<Value>,
}

/// Payload for `*:error` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepErrorData {
    pub error: String,
}

/// Payload for `dag:node_state`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeStateData {
    pub state: String,
}

/// Payload for `state_machine:transition`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionData {
    pub from: String,
    pub to: String,
    pub input: Value,
    pub output: Value,
    pub event: Option<String>,
    pub r#final: bool,
}
