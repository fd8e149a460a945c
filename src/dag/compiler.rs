//! Cycle detection and root/leaf computation.

use rustc_hash::{FxHashMap, FxHashSet};

use super::definition::NodeDescriptor;
use crate::error::DagCompileError;

/// Output of [`compile`]: the node names with no parents, and the node names
/// nobody declares as a parent.
#[derive(Debug, Clone)]
pub struct CompiledDag {
    pub root_set: Vec<String>,
    pub leaf_set: Vec<String>,
}

/// Validate a node mapping and compute its root/leaf sets.
///
/// Fails on an empty mapping, a parent name with no matching node, or a
/// cycle (reported as the full path that closes it).
pub fn compile<C>(nodes: &FxHashMap<String, NodeDescriptor<C>>) -> Result<CompiledDag, DagCompileError> {
    if nodes.is_empty() {
        return Err(DagCompileError::NoNodes);
    }

    for (child, descriptor) in nodes {
        for parent in &descriptor.parents {
            if !nodes.contains_key(parent) {
                return Err(DagCompileError::UnknownParent {
                    child: child.clone(),
                    parent: parent.clone(),
                });
            }
        }
    }

    let mut leaf_set: FxHashSet<String> = nodes.keys().cloned().collect();
    let mut done: FxHashSet<String> = FxHashSet::default();

    for name in nodes.keys() {
        let mut path = Vec::new();
        visit(name, nodes, &mut path, &mut leaf_set, &mut done)?;
    }

    let root_set = nodes
        .iter()
        .filter(|(_, descriptor)| descriptor.parents.is_empty())
        .map(|(name, _)| name.clone())
        .collect();

    Ok(CompiledDag {
        root_set,
        leaf_set: leaf_set.into_iter().collect(),
    })
}

fn visit<C>(
    name: &str,
    nodes: &FxHashMap<String, NodeDescriptor<C>>,
    path: &mut Vec<String>,
    leaf_set: &mut FxHashSet<String>,
    done: &mut FxHashSet<String>,
) -> Result<(), DagCompileError> {
    if done.contains(name) {
        return Ok(());
    }
    if let Some(pos) = path.iter().position(|n| n == name) {
        let mut cycle_path = path[pos..].to_vec();
        cycle_path.push(name.to_string());
        return Err(DagCompileError::Cycle { path: cycle_path });
    }

    path.push(name.to_string());
    for parent in &nodes[name].parents {
        leaf_set.remove(parent);
        visit(parent, nodes, path, leaf_set, done)?;
    }
    path.pop();
    done.insert(name.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::node_fn;
    use serde_json::json;

    fn node(parents: &[&str]) -> NodeDescriptor<()> {
        NodeDescriptor::new(node_fn(|_input| async move { Ok(json!(null)) })).parents(parents.to_vec())
    }

    fn map(pairs: Vec<(&str, &[&str])>) -> FxHashMap<String, NodeDescriptor<()>> {
        pairs
            .into_iter()
            .map(|(name, parents)| (name.to_string(), node(parents)))
            .collect()
    }

    #[test]
    fn empty_dag_errors() {
        let nodes: FxHashMap<String, NodeDescriptor<()>> = FxHashMap::default();
        assert!(matches!(compile(&nodes), Err(DagCompileError::NoNodes)));
    }

    #[test]
    fn unknown_parent_errors() {
        let nodes = map(vec![("a", &["ghost"])]);
        assert!(matches!(
            compile(&nodes),
            Err(DagCompileError::UnknownParent { .. })
        ));
    }

    #[test]
    fn cycle_is_detected() {
        let nodes = map(vec![("a", &["b"]), ("b", &["a"])]);
        match compile(&nodes) {
            Err(DagCompileError::Cycle { path }) => {
                assert!(path.len() >= 2);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn diamond_has_one_root_one_leaf() {
        let nodes = map(vec![
            ("root", &[]),
            ("intone", &["root"]),
            ("inttwo", &["root"]),
            ("collector", &["intone", "inttwo"]),
        ]);
        let compiled = compile(&nodes).unwrap();
        assert_eq!(compiled.root_set, vec!["root".to_string()]);
        assert_eq!(compiled.leaf_set, vec!["collector".to_string()]);
    }

    #[test]
    fn multi_leaf_without_collector() {
        let nodes = map(vec![("root", &[]), ("output_one", &["root"]), ("output_two", &["root"])]);
        let compiled = compile(&nodes).unwrap();
        let mut leaves = compiled.leaf_set;
        leaves.sort();
        assert_eq!(leaves, vec!["output_one".to_string(), "output_two".to_string()]);
    }
}
