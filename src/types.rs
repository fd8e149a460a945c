//! Identifiers and small value types shared across the crate.
//!
//! - [`RunId`]: the stable id of an outermost workflow run.
//! - [`StepId`]: the id of one nested step within a run.
//! - [`Value`]: the opaque JSON-ish payload type node bodies exchange.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for the outermost workflow run.
///
/// Always a UUIDv7 so ids are correlatable across process boundaries and sort
/// roughly by creation time, per the mandate in the design notes.
///
/// ```rust
/// use ramus::types::RunId;
///
/// let a = RunId::new();
/// let b = RunId::new();
/// assert_ne!(a, b);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

/// Identifier of a single nested step within a run.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepId(Uuid);

macro_rules! uuid_newtype {
    ($t:ident) => {
        impl $t {
            /// Allocate a fresh id using a UUIDv7 timestamp-ordered value.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wrap an existing uuid, e.g. one supplied for run "revival".
            #[must_use]
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            #[must_use]
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl fmt::Debug for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($t), self.0)
            }
        }
    };
}

uuid_newtype!(RunId);
uuid_newtype!(StepId);

/// Opaque JSON-ish value used for node inputs/outputs and event payloads.
///
/// Node bodies are free to work with their own Rust types internally; the
/// boundary between typed user code and the event bus goes through this
/// value so that sinks can serialise events uniformly. `Value::Null` plays
/// the role of the source spec's `undefined`.
pub type Value = serde_json::Value;
