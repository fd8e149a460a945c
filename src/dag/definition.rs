//! DAG definition types: the node mapping a [`super::compiler::compile`] and
//! [`super::runner::DagRunner`] consume.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::node::NodeBody;
use crate::types::Value;

/// One node's static declaration within a [`DagDefinition`].
pub struct NodeDescriptor<C> {
    /// Names of the nodes whose output this node depends on.
    pub parents: Vec<String>,
    /// Optional semaphore key this node's body must hold while running.
    pub semaphore_key: Option<String>,
    /// If true, a failed or cancelled parent does not cancel this node — its
    /// output is substituted with `Value::Null` and the node still runs once
    /// every parent has resolved one way or another.
    pub tolerate_parent_errors: bool,
    pub body: Arc<dyn NodeBody<C>>,
    /// Fed into the cache fingerprint in place of a `stable_repr` of `body`
    /// (see `cache::cache_key`); bump this when a node's body changes in a
    /// way that should invalidate prior cache entries.
    pub body_version: String,
    pub tags: Option<Value>,
}

impl<C> NodeDescriptor<C> {
    pub fn new(body: Arc<dyn NodeBody<C>>) -> Self {
        Self {
            parents: Vec::new(),
            semaphore_key: None,
            tolerate_parent_errors: false,
            body,
            body_version: String::new(),
            tags: None,
        }
    }

    #[must_use]
    pub fn parents(mut self, parents: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.parents = parents.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn semaphore_key(mut self, key: impl Into<String>) -> Self {
        self.semaphore_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn tolerate_parent_errors(mut self, tolerate: bool) -> Self {
        self.tolerate_parent_errors = tolerate;
        self
    }

    #[must_use]
    pub fn body_version(mut self, version: impl Into<String>) -> Self {
        self.body_version = version.into();
        self
    }
}

/// A whole DAG: its node mapping plus run-level defaults.
pub struct DagDefinition<C> {
    pub name: String,
    pub nodes: FxHashMap<String, NodeDescriptor<C>>,
    /// If true, a node failure is confined to its own subtree (via cascaded
    /// `tolerate_parent_errors`-style behaviour at the runner) instead of
    /// cancelling the whole DAG.
    pub tolerate_failures: bool,
}

impl<C> DagDefinition<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: FxHashMap::default(),
            tolerate_failures: false,
        }
    }

    #[must_use]
    pub fn add_node(mut self, name: impl Into<String>, node: NodeDescriptor<C>) -> Self {
        self.nodes.insert(name.into(), node);
        self
    }

    #[must_use]
    pub fn tolerate_failures(mut self, tolerate: bool) -> Self {
        self.tolerate_failures = tolerate;
        self
    }
}
